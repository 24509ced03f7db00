//! Normalized cell colors.
//!
//! Colors travel over the wire and through the grid as strings. Two colors
//! are the same color when their normalized strings match, so every `Color`
//! is normalized once at construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Color parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorError {
    #[error("Color string is empty")]
    Empty,
    #[error("Malformed color: {0}")]
    Malformed(String),
}

/// An RGB(+alpha) color stored as a normalized hex string.
///
/// The normalized form is lowercase `#rrggbb`, or `#rrggbbaa` when the
/// color is not fully opaque.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    /// Parse `#rgb`, `#rgba`, `#rrggbb` or `#rrggbbaa` (case insensitive).
    pub fn parse(input: &str) -> Result<Self, ColorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ColorError::Empty);
        }
        let hex = trimmed
            .strip_prefix('#')
            .ok_or_else(|| ColorError::Malformed(trimmed.to_string()))?;
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ColorError::Malformed(trimmed.to_string()));
        }

        let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).unwrap_or(0);
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).unwrap_or(0);

        let [r, g, b, a] = match hex.len() {
            3 => [nibble(0) * 17, nibble(1) * 17, nibble(2) * 17, 255],
            4 => [nibble(0) * 17, nibble(1) * 17, nibble(2) * 17, nibble(3) * 17],
            6 => [byte(0), byte(2), byte(4), 255],
            8 => [byte(0), byte(2), byte(4), byte(6)],
            _ => return Err(ColorError::Malformed(trimmed.to_string())),
        };
        Ok(Self::from_rgba8(r, g, b, a))
    }

    /// Build a color from 8-bit channels.
    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        if a == 255 {
            Self(format!("#{r:02x}{g:02x}{b:02x}"))
        } else {
            Self(format!("#{r:02x}{g:02x}{b:02x}{a:02x}"))
        }
    }

    /// White, the default brush color.
    pub fn white() -> Self {
        Self::from_rgba8(255, 255, 255, 255)
    }

    /// The normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channels as `[r, g, b, a]`.
    pub fn to_rgba8(&self) -> [u8; 4] {
        let hex = &self.0[1..];
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).unwrap_or(0);
        let a = if hex.len() == 8 { byte(6) } else { 255 };
        [byte(0), byte(2), byte(4), a]
    }

    /// Same RGB with the alpha channel replaced.
    pub fn with_alpha(&self, alpha: u8) -> Self {
        let [r, g, b, _] = self.to_rgba8();
        Self::from_rgba8(r, g, b, alpha)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::white()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Color {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Color {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.0
    }
}

impl From<&Color> for peniko::Color {
    fn from(color: &Color) -> Self {
        let [r, g, b, a] = color.to_rgba8();
        peniko::Color::from_rgba8(r, g, b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_case_and_short_form() {
        assert_eq!(Color::parse("#FFF").unwrap().as_str(), "#ffffff");
        assert_eq!(Color::parse("  #AbCdEf ").unwrap().as_str(), "#abcdef");
        assert_eq!(Color::parse("#abcdef").unwrap(), Color::parse("#ABCDEF").unwrap());
    }

    #[test]
    fn test_opaque_alpha_is_dropped() {
        assert_eq!(Color::parse("#112233ff").unwrap().as_str(), "#112233");
        assert_eq!(Color::parse("#123f").unwrap().as_str(), "#112233");
        assert_eq!(Color::parse("#11223388").unwrap().as_str(), "#11223388");
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(Color::parse(""), Err(ColorError::Empty));
        assert!(matches!(Color::parse("red"), Err(ColorError::Malformed(_))));
        assert!(matches!(Color::parse("#12345"), Err(ColorError::Malformed(_))));
        assert!(matches!(Color::parse("#gggggg"), Err(ColorError::Malformed(_))));
    }

    #[test]
    fn test_with_alpha_for_selection_tint() {
        let color = Color::parse("#ff0000").unwrap();
        assert_eq!(color.with_alpha(0x88).as_str(), "#ff000088");
        assert_eq!(color.with_alpha(0x88).to_rgba8(), [255, 0, 0, 0x88]);
    }

    #[test]
    fn test_serde_uses_normalized_string() {
        let color: Color = serde_json::from_str("\"#ABC\"").unwrap();
        assert_eq!(serde_json::to_string(&color).unwrap(), "\"#aabbcc\"");
        assert!(serde_json::from_str::<Color>("\"nope\"").is_err());
    }
}
