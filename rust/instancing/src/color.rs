// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CSS-style color strings.
//!
//! Accepts `#rgb`, `#rrggbb`, `rgb(r, g, b)` and `rgba(r, g, b, a)`, case
//! insensitive. Channels are 0..=255; alpha is 0..=1, or 0..=255 when it is
//! greater than one (the `RGBA(255,0,0,128)` form).

use crate::{Error, Result};

/// Opaque white, used when a color string cannot be parsed.
pub const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Parse a color string into normalized RGBA.
pub fn parse_color(input: &str) -> Result<[f32; 4]> {
    let s = input.trim().to_ascii_lowercase();
    let invalid = || Error::InvalidColor(input.to_string());

    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex).ok_or_else(invalid);
    }

    let (args, has_alpha) = if let Some(rest) = s.strip_prefix("rgba(") {
        (rest, true)
    } else if let Some(rest) = s.strip_prefix("rgb(") {
        (rest, false)
    } else {
        return Err(invalid());
    };
    let args = args.strip_suffix(')').ok_or_else(invalid)?;

    let values: Vec<f32> = args
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| invalid())?;

    match (values.as_slice(), has_alpha) {
        ([r, g, b], false) => Ok([channel(*r), channel(*g), channel(*b), 1.0]),
        ([r, g, b, a], true) => {
            let alpha = if *a > 1.0 { channel(*a) } else { a.clamp(0.0, 1.0) };
            Ok([channel(*r), channel(*g), channel(*b), alpha])
        }
        _ => Err(invalid()),
    }
}

/// Parse a color, logging and falling back to [`WHITE`] on failure.
pub fn parse_color_or_white(input: &str) -> [f32; 4] {
    parse_color(input).unwrap_or_else(|e| {
        tracing::warn!(color = input, error = %e, "falling back to white");
        WHITE
    })
}

fn channel(v: f32) -> f32 {
    v.clamp(0.0, 255.0) / 255.0
}

fn parse_hex(hex: &str) -> Option<[f32; 4]> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let digit = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok();
    let pair = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();

    let (r, g, b) = match hex.len() {
        3 => (digit(0)? * 17, digit(1)? * 17, digit(2)? * 17),
        6 => (pair(0)?, pair(2)?, pair(4)?),
        _ => return None,
    };
    Some([r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, 1.0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hex_forms() {
        assert_eq!(parse_color("#fff").unwrap(), WHITE);
        assert_eq!(parse_color("#FF0000").unwrap(), [1.0, 0.0, 0.0, 1.0]);
        let c = parse_color("#336699").unwrap();
        assert_relative_eq!(c[0], 0.2);
        assert_relative_eq!(c[1], 0.4);
        assert_relative_eq!(c[2], 0.6);
    }

    #[test]
    fn test_functional_forms() {
        assert_eq!(parse_color("rgb(0, 255, 0)").unwrap(), [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(
            parse_color("RGBA(0,0,255,0.5)").unwrap(),
            [0.0, 0.0, 1.0, 0.5]
        );
        let c = parse_color("RGBA(255,0,0,51)").unwrap();
        assert_relative_eq!(c[3], 0.2);
    }

    #[test]
    fn test_invalid_colors() {
        for bad in ["", "red", "#12", "#gggggg", "rgb(1,2)", "rgba(1,2,3)", "rgb(1,2,3"] {
            assert!(parse_color(bad).is_err(), "{bad} should be rejected");
        }
        assert_eq!(parse_color_or_white("nonsense"), WHITE);
    }
}
