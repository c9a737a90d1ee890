// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Resource quantities compared by value. The apiserver stores the canonical
//! form of a quantity, so `0.5` comes back as `500m` and `1024Mi` as `1Gi`.

use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

const NANO_DIGITS: i32 = 9;

fn suffix_scale(suffix: &str) -> Option<(i128, i32)> {
    let scale = match suffix {
        "" => (1, 0),
        "n" => (1, -9),
        "u" => (1, -6),
        "m" => (1, -3),
        "k" => (1, 3),
        "M" => (1, 6),
        "G" => (1, 9),
        "T" => (1, 12),
        "P" => (1, 15),
        "E" => (1, 18),
        "Ki" => (1 << 10, 0),
        "Mi" => (1 << 20, 0),
        "Gi" => (1 << 30, 0),
        "Ti" => (1 << 40, 0),
        "Pi" => (1 << 50, 0),
        "Ei" => (1 << 60, 0),
        exponent => {
            let exponent = exponent.strip_prefix(|c: char| c == 'e' || c == 'E')?;
            (1, exponent.parse::<i32>().ok()?)
        }
    };
    Some(scale)
}

/// The value of `quantity` in units of 10⁻⁹. `None` when the text is not a
/// quantity or is finer than nano precision.
pub fn nano_value(quantity: &str) -> Option<i128> {
    let quantity = quantity.trim();
    let (negative, unsigned) = match quantity.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, quantity.strip_prefix('+').unwrap_or(quantity)),
    };
    let split = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(split);
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let mantissa: i128 = format!("{}{}", whole, fraction).parse().ok()?;
    let (binary, exponent) = suffix_scale(suffix)?;

    let mut value = mantissa.checked_mul(binary)?;
    let shift = exponent.checked_add(NANO_DIGITS)?.checked_sub(i32::try_from(fraction.len()).ok()?)?;
    if shift >= 0 {
        value = value.checked_mul(10i128.checked_pow(u32::try_from(shift).ok()?)?)?;
    } else {
        let divisor = 10i128.checked_pow(u32::try_from(-shift).ok()?)?;
        if value % divisor != 0 {
            return None;
        }
        value /= divisor;
    }
    Some(if negative { -value } else { value })
}

/// Same value, or the same text when either side does not parse.
pub fn equal_quantity(want: &Quantity, have: &Quantity) -> bool {
    match (nano_value(&want.0), nano_value(&have.0)) {
        (Some(l), Some(r)) => l == r,
        _ => want.0 == have.0,
    }
}

fn equal_quantities(want: Option<&BTreeMap<String, Quantity>>, have: Option<&BTreeMap<String, Quantity>>) -> bool {
    let (want, have) = (want.cloned().unwrap_or_default(), have.cloned().unwrap_or_default());
    want.len() == have.len()
        && want
            .iter()
            .all(|(name, quantity)| have.get(name).map_or(false, |other| equal_quantity(quantity, other)))
}

pub fn equal_resource_requirements(want: &corev1::ResourceRequirements, have: &corev1::ResourceRequirements) -> bool {
    equal_quantities(want.limits.as_ref(), have.limits.as_ref())
        && equal_quantities(want.requests.as_ref(), have.requests.as_ref())
        && want.claims.as_deref().unwrap_or_default() == have.claims.as_deref().unwrap_or_default()
}
