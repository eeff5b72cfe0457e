//! Display geometry and the rotated software blit.
//!
//! The logical display is 480×320 landscape, but the panel is physically
//! mounted as 320×480 portrait, so every presented pixel goes through a
//! fixed 270° rotation. Each device variant maps a crop of the engine's
//! native frame onto a destination rectangle of the logical display; the
//! mapping is a data-only table, not code per variant.

use palmboy_core::{Model, Platform};

/// Logical display width (landscape orientation the content is laid out in).
pub const DISPLAY_WIDTH: u32 = 480;

/// Logical display height.
pub const DISPLAY_HEIGHT: u32 = 320;

/// Physical panel width (portrait mount).
pub const PANEL_WIDTH: u32 = 320;

/// Physical panel height.
pub const PANEL_HEIGHT: u32 = 480;

/// Presentation class of the loaded content. Fixed for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceVariant {
    /// Monochrome Game Boy: 160×144 crop, integer-doubled and centered.
    Gb,
    /// Super Game Boy: border-inclusive crop, stretched to the full display.
    Sgb,
    /// Game Boy Color: same presentation as [`DeviceVariant::Gb`].
    Gbc,
    /// The whole native frame stretched to the full display.
    Full,
}

impl DeviceVariant {
    /// Classify a session from the engine's reported platform and model.
    #[must_use]
    pub fn for_session(platform: Platform, model: Model) -> Self {
        match platform {
            Platform::GameBoyAdvance => Self::Full,
            Platform::GameBoy => match model {
                Model::Sgb => Self::Sgb,
                Model::Cgb | Model::Agb => Self::Gbc,
                Model::Dmg => Self::Gb,
            },
        }
    }
}

/// Source crop within the engine's native frame.
///
/// Heights are signed: a negative height marks a bottom-referenced rect
/// whose `y` names the bottom edge. [`SrcRect::normalized`] resolves either
/// form to a top-left origin, clamped into the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl SrcRect {
    /// Top-left origin and positive extent: `(x, y, width, height)`.
    #[must_use]
    pub fn normalized(&self) -> (u32, u32, u32, u32) {
        let w = self.width.unsigned_abs();
        let h = self.height.unsigned_abs();
        let top = if self.height < 0 {
            (self.y - h as i32).max(0)
        } else {
            self.y.max(0)
        };
        (self.x.max(0) as u32, top as u32, w, h)
    }
}

/// Destination rectangle on the logical 480×320 display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DstRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One variant's presentation mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub src: SrcRect,
    pub dst: DstRect,
}

/// Look up the presentation mapping for a variant and the engine's native
/// frame dimensions.
#[must_use]
pub fn geometry_for(variant: DeviceVariant, native_width: u32, native_height: u32) -> Geometry {
    match variant {
        // 160×144 LCD area out of the 256×224 render, doubled and centered.
        DeviceVariant::Gb | DeviceVariant::Gbc => Geometry {
            src: SrcRect {
                x: 0,
                y: 144,
                width: 160,
                height: -144,
            },
            dst: DstRect {
                x: (DISPLAY_WIDTH - 320) / 2,
                y: (DISPLAY_HEIGHT - 288) / 2,
                width: 320,
                height: 288,
            },
        },
        // Border-inclusive 240×160 crop of the 256×224 render, full screen.
        DeviceVariant::Sgb => Geometry {
            src: SrcRect {
                x: (256 - 240) / 2,
                y: 160 + (224 - 160) / 2,
                width: 240,
                height: -160,
            },
            dst: DstRect {
                x: 0,
                y: 0,
                width: DISPLAY_WIDTH,
                height: DISPLAY_HEIGHT,
            },
        },
        DeviceVariant::Full => Geometry {
            src: SrcRect {
                x: 0,
                y: 0,
                width: native_width as i32,
                height: -(native_height as i32),
            },
            dst: DstRect {
                x: 0,
                y: 0,
                width: DISPLAY_WIDTH,
                height: DISPLAY_HEIGHT,
            },
        },
    }
}

/// Map a logical display coordinate to its panel coordinate under the fixed
/// 270° rotation.
#[must_use]
pub fn rotate_270(x: u32, y: u32) -> (u32, u32) {
    (y, DISPLAY_WIDTH - 1 - x)
}

/// Nearest-neighbor blit of the geometry's source crop onto the portrait
/// panel buffer, rotation applied per pixel.
///
/// `frame` is the engine's RGBA output with a row stride of `frame_width`
/// pixels; `panel` is a [`PANEL_WIDTH`]×[`PANEL_HEIGHT`] RGBA buffer.
pub fn blit_rotated(frame: &[u8], frame_width: u32, geo: &Geometry, panel: &mut [u8]) {
    let (sx, sy, sw, sh) = geo.src.normalized();
    let dst = geo.dst;
    if sw == 0 || sh == 0 || dst.width == 0 || dst.height == 0 {
        return;
    }

    for dy in 0..dst.height {
        let src_y = sy + dy * sh / dst.height;
        for dx in 0..dst.width {
            let src_x = sx + dx * sw / dst.width;
            let src_idx = ((src_y * frame_width + src_x) * 4) as usize;

            let (px, py) = rotate_270(dst.x + dx, dst.y + dy);
            let dst_idx = ((py * PANEL_WIDTH + px) * 4) as usize;

            panel[dst_idx..dst_idx + 4].copy_from_slice(&frame[src_idx..src_idx + 4]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_every_session_shape() {
        use DeviceVariant as V;
        assert_eq!(
            V::for_session(Platform::GameBoy, Model::Dmg),
            V::Gb
        );
        assert_eq!(
            V::for_session(Platform::GameBoy, Model::Sgb),
            V::Sgb
        );
        assert_eq!(
            V::for_session(Platform::GameBoy, Model::Cgb),
            V::Gbc
        );
        assert_eq!(
            V::for_session(Platform::GameBoyAdvance, Model::Agb),
            V::Full
        );
    }

    #[test]
    fn geometry_rows_stay_inside_their_frames() {
        // (variant, native frame) pairs as the engines report them.
        let cases = [
            (DeviceVariant::Gb, 256, 224),
            (DeviceVariant::Gbc, 256, 224),
            (DeviceVariant::Sgb, 256, 224),
            (DeviceVariant::Full, 240, 160),
        ];
        for (variant, w, h) in cases {
            let geo = geometry_for(variant, w, h);
            let (sx, sy, sw, sh) = geo.src.normalized();
            assert!(sx + sw <= w, "{variant:?} src x out of frame");
            assert!(sy + sh <= h, "{variant:?} src y out of frame");
            assert!(geo.dst.x + geo.dst.width <= DISPLAY_WIDTH);
            assert!(geo.dst.y + geo.dst.height <= DISPLAY_HEIGHT);
            // Bottom-referenced heights throughout the table.
            assert!(geo.src.height < 0, "{variant:?} height sign");
        }
    }

    #[test]
    fn gb_crop_is_the_lcd_area_doubled_and_centered() {
        let geo = geometry_for(DeviceVariant::Gb, 256, 224);
        assert_eq!(geo.src.normalized(), (0, 0, 160, 144));
        assert_eq!(
            geo.dst,
            DstRect {
                x: 80,
                y: 16,
                width: 320,
                height: 288
            }
        );
    }

    #[test]
    fn rotation_maps_the_display_corners() {
        assert_eq!(rotate_270(0, 0), (0, 479));
        assert_eq!(rotate_270(479, 0), (0, 0));
        assert_eq!(rotate_270(0, 319), (319, 479));
        assert_eq!(rotate_270(479, 319), (319, 0));
    }

    #[test]
    fn rotation_lands_every_pixel_on_the_panel() {
        for &(x, y) in &[(0, 0), (479, 319), (240, 160), (1, 318)] {
            let (px, py) = rotate_270(x, y);
            assert!(px < PANEL_WIDTH);
            assert!(py < PANEL_HEIGHT);
        }
    }

    #[test]
    fn blit_places_a_marker_pixel_where_rotation_says() {
        let (w, h) = (240u32, 160u32);
        let mut frame = vec![0u8; (w * h * 4) as usize];
        // Mark the source's top-left pixel.
        frame[..4].copy_from_slice(&[1, 2, 3, 4]);

        let geo = geometry_for(DeviceVariant::Full, w, h);
        let mut panel = vec![0u8; (PANEL_WIDTH * PANEL_HEIGHT * 4) as usize];
        blit_rotated(&frame, w, &geo, &mut panel);

        // Logical (0, 0) lands at panel (0, 479).
        let (px, py) = rotate_270(0, 0);
        let idx = ((py * PANEL_WIDTH + px) * 4) as usize;
        assert_eq!(&panel[idx..idx + 4], &[1, 2, 3, 4]);
    }

    #[test]
    fn full_blit_covers_the_whole_panel() {
        let (w, h) = (240u32, 160u32);
        let frame = vec![0xAAu8; (w * h * 4) as usize];
        let geo = geometry_for(DeviceVariant::Full, w, h);
        let mut panel = vec![0u8; (PANEL_WIDTH * PANEL_HEIGHT * 4) as usize];
        blit_rotated(&frame, w, &geo, &mut panel);
        assert!(panel.iter().all(|&b| b == 0xAA));
    }
}
