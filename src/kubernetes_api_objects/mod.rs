// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod owner;
pub mod patch;
pub mod quantity;
pub mod selector;
