//! Video containers, the raw decoder and the looping video source

pub mod animation;
pub mod decoder;
pub mod decoder_source;
pub mod demux;
pub mod y4m;

pub use decoder::{Decoder, RawVideoDecoder, DECODER_DEPTH};
pub use decoder_source::{DecoderState, VideoDecoderSource};
pub use demux::{open_demuxer, Codec, Demuxer, Sample, TrackInfo, TrackKind};

/// Fixture writers shared by the video tests
#[cfg(test)]
pub(crate) mod test_support {
    use image::codecs::gif::{GifEncoder, Repeat};
    use image::{Delay, Frame, Rgba, RgbaImage};
    use std::io::Write;
    use std::path::{Path, PathBuf};

    pub fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vcam-video-{}-{}", std::process::id(), name))
    }

    /// `frames` frames at 25 fps; frame `i` has luma `16 + 60 * i` and neutral chroma
    pub fn write_y4m(path: &Path, width: u32, height: u32, frames: u32, colour_space: &str) {
        let (w, h) = (width as usize, height as usize);
        let (chroma, mono) = match colour_space {
            "444" => (w * h, false),
            "mono" => (0, true),
            _ => (w.div_ceil(2) * h.div_ceil(2), false),
        };

        let mut bytes = format!("YUV4MPEG2 W{} H{} F25:1 Ip A1:1 C{}\n", width, height, colour_space).into_bytes();
        for i in 0..frames {
            bytes.extend_from_slice(b"FRAME\n");
            bytes.extend(std::iter::repeat((16 + 60 * i) as u8).take(w * h));
            if !mono {
                bytes.extend(std::iter::repeat(128u8).take(chroma * 2));
            }
        }

        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&bytes).unwrap();
    }

    /// One solid-colour frame per entry of `colours`
    pub fn write_gif(path: &Path, width: u32, height: u32, colours: &[[u8; 4]], delay_ms: u32) {
        let file = std::fs::File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        encoder.set_repeat(Repeat::Infinite).unwrap();

        let frames = colours.iter().map(|&c| {
            Frame::from_parts(
                RgbaImage::from_pixel(width, height, Rgba(c)),
                0,
                0,
                Delay::from_numer_denom_ms(delay_ms, 1),
            )
        });
        encoder.encode_frames(frames).unwrap();
    }
}
