//! Frame annotation

use crate::font::{draw_text, GLYPH_HEIGHT};
use camera_capture::VideoFrame;
use face_locator::FaceBox;
use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use inference_engine::EmotionObservation;

const NEGATIVE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const DEFAULT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;
const TEXT_SCALE: u32 = 2;

/// A classified face to draw
#[derive(Debug, Clone, Copy)]
pub struct FaceMark {
    pub face: FaceBox,
    pub observation: EmotionObservation,
}

/// Copy `frame` and draw a box plus `label(conf)` for every mark
pub fn annotate(frame: &VideoFrame, marks: &[FaceMark]) -> VideoFrame {
    if marks.is_empty() {
        return frame.clone();
    }

    let mut img = frame.to_rgb_image();
    for mark in marks {
        let color = if mark.observation.label.is_negative() {
            NEGATIVE_COLOR
        } else {
            DEFAULT_COLOR
        };

        let face = mark.face;
        for inset in 0..BOX_THICKNESS {
            let w = face.width.saturating_sub(2 * inset);
            let h = face.height.saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at((face.x + inset) as i32, (face.y + inset) as i32).of_size(w, h);
            draw_hollow_rect_mut(&mut img, rect, color);
        }

        let text = format!(
            "{}({:.2})",
            mark.observation.label.as_str(),
            mark.observation.confidence
        );
        let text_height = (GLYPH_HEIGHT * TEXT_SCALE) as i32;
        // Above the box, or inside it when there is no room
        let text_y = if face.y as i32 - text_height - 4 >= 0 {
            face.y as i32 - text_height - 4
        } else {
            face.y as i32 + 4
        };
        draw_text(&mut img, face.x as i32, text_y, &text, color, TEXT_SCALE);
    }

    VideoFrame::from_rgb_image(img, frame.timestamp_ns, frame.sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference_engine::EmotionLabel;

    fn mark(label: EmotionLabel) -> FaceMark {
        FaceMark {
            face: FaceBox::new(40, 40, 60, 60, 0.9),
            observation: EmotionObservation::new(label, 0.9),
        }
    }

    #[test]
    fn test_negative_box_is_red() {
        let frame = VideoFrame::filled(160, 120, [0, 0, 0]);
        let out = annotate(&frame, &[mark(EmotionLabel::Anger)]);
        assert_eq!(out.get_pixel(40, 60), Some([255, 0, 0]));
        assert_eq!(out.get_pixel(70, 70), Some([0, 0, 0]));
    }

    #[test]
    fn test_neutral_box_is_green() {
        let frame = VideoFrame::filled(160, 120, [0, 0, 0]);
        let out = annotate(&frame, &[mark(EmotionLabel::Neutral)]);
        assert_eq!(out.get_pixel(41, 60), Some([0, 255, 0]));
    }

    #[test]
    fn test_source_frame_untouched() {
        let frame = VideoFrame::filled(160, 120, [10, 10, 10]);
        let out = annotate(&frame, &[mark(EmotionLabel::Fear)]);
        assert!(frame.data.iter().all(|v| *v == 10));
        assert_ne!(out.data, frame.data);
        assert_eq!(out.sequence, frame.sequence);
    }

    #[test]
    fn test_box_at_frame_edge() {
        let frame = VideoFrame::filled(64, 64, [0, 0, 0]);
        let edge = FaceMark {
            face: FaceBox::new(0, 0, 64, 64, 0.9),
            observation: EmotionObservation::new(EmotionLabel::Happiness, 0.8),
        };
        let out = annotate(&frame, &[edge]);
        assert_eq!(out.get_pixel(0, 0), Some([0, 255, 0]));
    }
}
