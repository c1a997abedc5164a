//! Handles parsing and comparison of target colors.

use std::{fmt, str::FromStr};

/// An RGB color without alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rgb {
    /// The red channel.
    pub(crate) r: u8,
    /// The green channel.
    pub(crate) g: u8,
    /// The blue channel.
    pub(crate) b: u8,
}

impl Rgb {
    /// Extracts the color channels of an RGBA pixel, ignoring alpha.
    pub(crate) fn from_rgba(pixel: image::Rgba<u8>) -> Self {
        let [r, g, b, _] = pixel.0;
        Rgb { r, g, b }
    }

    /// Checks whether every channel differs from `target` by at most `tolerance`.
    pub(crate) fn matches(self, target: Rgb, tolerance: u8) -> bool {
        self.r.abs_diff(target.r) <= tolerance
            && self.g.abs_diff(target.g) <= tolerance
            && self.b.abs_diff(target.b) <= tolerance
    }
}

impl FromStr for Rgb {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);

        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("`{s}` is not a hex color like #FF0000 or FF0000");
        }

        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);

        Ok(Rgb {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Rgb { r, g, b } = self;
        write!(f, "#{r:02X}{g:02X}{b:02X}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_and_without_hash() {
        let expected = Rgb { r: 0xff, g: 0x80, b: 0x00 };
        assert_eq!("#FF8000".parse::<Rgb>().unwrap(), expected);
        assert_eq!("ff8000".parse::<Rgb>().unwrap(), expected);
        assert_eq!(expected.to_string(), "#FF8000");
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!("#FF80".parse::<Rgb>().is_err());
        assert!("GG0000".parse::<Rgb>().is_err());
        assert!("#FF00000".parse::<Rgb>().is_err());
        assert!("".parse::<Rgb>().is_err());
    }

    #[test]
    fn tolerance_is_inclusive() {
        let target = Rgb { r: 100, g: 100, b: 100 };
        let at_limit = Rgb { r: 105, g: 95, b: 105 };
        let over_limit = Rgb { r: 105, g: 95, b: 106 };

        assert!(at_limit.matches(target, 5));
        assert!(!over_limit.matches(target, 5));
    }

    #[test]
    fn match_is_symmetric() {
        let a = Rgb { r: 10, g: 200, b: 30 };
        let b = Rgb { r: 13, g: 198, b: 30 };
        for tolerance in 0..5 {
            assert_eq!(a.matches(b, tolerance), b.matches(a, tolerance));
        }
    }

    #[test]
    fn red_with_large_deviation_does_not_match() {
        let target: Rgb = "#FF0000".parse().unwrap();
        let pixel = Rgb::from_rgba(image::Rgba([250, 10, 10, 255]));
        assert!(!pixel.matches(target, 5));
    }
}
