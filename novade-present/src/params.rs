//! Presentation parameters and the small enums that travel with them.

use bitflags::bitflags;
use tracing::warn;

use crate::window::WindowHandle;

/// Maximum number of back buffers a swap chain may request.
pub const MAX_BACK_BUFFERS: u32 = 3;

/// Surface formats, with their Direct3D values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Unknown,
    R8G8B8,
    A8R8G8B8,
    X8R8G8B8,
    R5G6B5,
    Other(u32),
}

impl Format {
    pub fn raw(self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R8G8B8 => 20,
            Format::A8R8G8B8 => 21,
            Format::X8R8G8B8 => 22,
            Format::R5G6B5 => 23,
            Format::Other(raw) => raw,
        }
    }

    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Format::Unknown,
            20 => Format::R8G8B8,
            21 => Format::A8R8G8B8,
            22 => Format::X8R8G8B8,
            23 => Format::R5G6B5,
            other => Format::Other(other),
        }
    }

    /// Guesses the format of a display running at `bits_per_pixel`.
    pub fn for_display_depth(bits_per_pixel: u32) -> Self {
        match bits_per_pixel {
            32 => Format::X8R8G8B8,
            24 => Format::R8G8B8,
            16 => Format::R5G6B5,
            other => {
                warn!(bits_per_pixel = other, "unknown display format");
                Format::Unknown
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SwapEffect {
    #[default]
    Discard,
    Flip,
    Copy,
    Overlay,
    FlipEx,
}

bitflags! {
    /// Flags accepted by [`Present::present`](crate::Present::present).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PresentFlags: u32 {
        /// Return instead of waiting for the copy. The copy path never waits,
        /// so this has no effect.
        const DONOTWAIT = 1;
        const LINEAR_CONTENT = 2;
    }
}

/// Swap chain description handed over by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresentationParameters {
    /// Zero means "size of the window's client area".
    pub back_buffer_width: u32,
    pub back_buffer_height: u32,
    pub back_buffer_format: Format,
    pub back_buffer_count: u32,
    pub swap_effect: SwapEffect,
    pub device_window: Option<WindowHandle>,
    pub windowed: bool,
    pub presentation_interval: u32,
}

impl PresentationParameters {
    /// Brings the buffer count and format into the supported range.
    ///
    /// Copy swaps use a single back buffer, no chain uses more than
    /// [`MAX_BACK_BUFFERS`], zero means one, and an unknown format means
    /// `A8R8G8B8`.
    pub fn clamp_buffers(&mut self) {
        if self.swap_effect == SwapEffect::Copy && self.back_buffer_count > 1 {
            warn!(
                count = self.back_buffer_count,
                "back buffer count > 1 with a copy swap effect"
            );
            self.back_buffer_count = 1;
        }
        if self.back_buffer_count > MAX_BACK_BUFFERS {
            warn!(count = self.back_buffer_count, "back buffer count > {MAX_BACK_BUFFERS}");
            self.back_buffer_count = MAX_BACK_BUFFERS;
        }
        if self.back_buffer_count == 0 {
            self.back_buffer_count = 1;
        }
        if self.back_buffer_format == Format::Unknown {
            self.back_buffer_format = Format::A8R8G8B8;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanlineOrdering {
    #[default]
    Progressive,
    Interlaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayRotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl DisplayRotation {
    pub fn from_orientation(orientation: u32) -> Self {
        match orientation {
            0 => DisplayRotation::Identity,
            1 => DisplayRotation::Rotate90,
            2 => DisplayRotation::Rotate180,
            3 => DisplayRotation::Rotate270,
            other => {
                warn!(orientation = other, "unknown display rotation");
                DisplayRotation::Identity
            }
        }
    }
}

/// Current mode of the display a backend presents to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
    pub format: Format,
    pub scanline_ordering: ScanlineOrdering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RasterStatus {
    pub in_vblank: bool,
    pub scan_line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentStats {
    pub present_count: u32,
    pub present_refresh_count: u32,
    pub sync_refresh_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn params(swap_effect: SwapEffect, count: u32) -> PresentationParameters {
        PresentationParameters {
            swap_effect,
            back_buffer_count: count,
            ..Default::default()
        }
    }

    #[rstest]
    #[case::copy_many(SwapEffect::Copy, 5, 1)]
    #[case::copy_two(SwapEffect::Copy, 2, 1)]
    #[case::zero(SwapEffect::Discard, 0, 1)]
    #[case::copy_zero(SwapEffect::Copy, 0, 1)]
    #[case::too_many(SwapEffect::Flip, 7, 3)]
    #[case::in_range(SwapEffect::Discard, 2, 2)]
    #[case::max(SwapEffect::FlipEx, 3, 3)]
    fn buffer_count_is_clamped(#[case] swap: SwapEffect, #[case] count: u32, #[case] expected: u32) {
        let mut p = params(swap, count);
        p.clamp_buffers();
        assert_eq!(p.back_buffer_count, expected);
    }

    #[test]
    fn unknown_format_becomes_argb() {
        let mut p = params(SwapEffect::Discard, 1);
        p.clamp_buffers();
        assert_eq!(p.back_buffer_format, Format::A8R8G8B8);

        let mut p = params(SwapEffect::Discard, 1);
        p.back_buffer_format = Format::R5G6B5;
        p.clamp_buffers();
        assert_eq!(p.back_buffer_format, Format::R5G6B5);
    }

    #[rstest]
    #[case(32, Format::X8R8G8B8)]
    #[case(24, Format::R8G8B8)]
    #[case(16, Format::R5G6B5)]
    #[case(8, Format::Unknown)]
    fn display_depth_guess(#[case] bpp: u32, #[case] expected: Format) {
        assert_eq!(Format::for_display_depth(bpp), expected);
    }

    #[test]
    fn format_raw_values() {
        assert_eq!(Format::A8R8G8B8.raw(), 21);
        assert_eq!(Format::from_raw(22), Format::X8R8G8B8);
        assert_eq!(Format::from_raw(77), Format::Other(77));
    }

    #[test]
    fn unknown_orientation_is_identity() {
        assert_eq!(DisplayRotation::from_orientation(2), DisplayRotation::Rotate180);
        assert_eq!(DisplayRotation::from_orientation(9), DisplayRotation::Identity);
    }
}
