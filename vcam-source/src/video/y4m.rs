//! YUV4MPEG2 streaming demuxer
//!
//! Layout: one text header line (`YUV4MPEG2 W.. H.. F..:.. C..`), then per
//! frame a `FRAME` line followed by the raw planes. Samples are read lazily
//! straight from the file.

use super::demux::{Codec, Demuxer, Sample, TrackInfo, TrackKind};
use crate::handles::{HandleGuard, HandleKind};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind as IoErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use vcam_video::{Error, Result};

/// Longest header or frame line accepted
const MAX_LINE: u64 = 1024;

/// Largest frame edge accepted, keeps the per-frame allocation bounded
const MAX_DIMENSION: u32 = 16384;

#[derive(Debug)]
pub struct Y4mDemuxer {
    reader: BufReader<File>,
    data_start: u64,
    tracks: Vec<TrackInfo>,
    selected: Option<usize>,
    frame_size: usize,
    rate: (u32, u32),
    frame_index: u64,
    _handle: HandleGuard,
}

/// Parsed stream header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    width: u32,
    height: u32,
    rate: (u32, u32),
    codec: Codec,
}

impl Y4mDemuxer {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::from_open(e, path))?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let line = read_line(&mut reader)?
            .ok_or_else(|| Error::UnsupportedFormat(format!("{}: empty file", path.display())))?;
        let header = parse_header(&line)
            .map_err(|reason| Error::UnsupportedFormat(format!("{}: {}", path.display(), reason)))?;
        let data_start = reader.stream_position()?;

        let frame_size = header.codec.frame_size(header.width, header.height);
        let record = (frame_size + b"FRAME\n".len()) as u64;
        let payload = file_len - data_start;
        let frame_count = (payload % record == 0).then_some(payload / record);

        log::debug!(
            "y4m {}: {}x{} {:?} at {}/{} fps, {:?} frames",
            path.display(),
            header.width,
            header.height,
            header.codec,
            header.rate.0,
            header.rate.1,
            frame_count
        );

        Ok(Self {
            reader,
            data_start,
            tracks: vec![TrackInfo {
                kind: TrackKind::Video,
                codec: header.codec,
                width: header.width,
                height: header.height,
                frame_rate: Some(header.rate),
                frame_count,
            }],
            selected: None,
            frame_size,
            rate: header.rate,
            frame_index: 0,
            _handle: HandleGuard::new(HandleKind::Demuxer),
        })
    }

    fn timestamp_us(&self, index: u64) -> u64 {
        let (num, den) = self.rate;
        let us = index as u128 * 1_000_000 * den as u128 / num as u128;
        u64::try_from(us).unwrap_or(u64::MAX)
    }
}

impl Demuxer for Y4mDemuxer {
    fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(Error::invalid_parameter(
                "track",
                format!("index {} out of {} tracks", index, self.tracks.len()),
            ));
        }
        self.selected = Some(index);
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<Sample>> {
        let track = match self.selected {
            Some(index) => &self.tracks[index],
            None => return Err(Error::DecodeFailure("no track selected".into())),
        };
        let codec = track.codec;

        let line = match read_line(&mut self.reader)? {
            Some(line) => line,
            None => return Ok(None),
        };
        if !line.starts_with(b"FRAME") {
            return Err(Error::DecodeFailure(format!(
                "missing FRAME marker before frame {}",
                self.frame_index
            )));
        }

        let mut data = vec![0u8; self.frame_size];
        match self.reader.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => {
                log::warn!("y4m frame {} truncated, treating as end of stream", self.frame_index);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let pts_us = self.timestamp_us(self.frame_index);
        let duration_us = self.timestamp_us(self.frame_index + 1).saturating_sub(pts_us);
        self.frame_index += 1;

        Ok(Some(Sample {
            data: data.into(),
            codec,
            pts_us,
            duration_us,
        }))
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(self.data_start))?;
        self.frame_index = 0;
        Ok(())
    }
}

/// Read one `\n`-terminated line; `None` at a clean end of file
fn read_line(reader: &mut BufReader<File>) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let n = reader.by_ref().take(MAX_LINE).read_until(b'\n', &mut line)?;
    if n == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        return Err(Error::DecodeFailure("unterminated or oversized line".into()));
    }
    line.pop();
    Ok(Some(line))
}

fn parse_header(line: &[u8]) -> std::result::Result<Header, String> {
    let text = std::str::from_utf8(line).map_err(|_| "header is not ASCII".to_string())?;
    let mut tokens = text.split(' ');
    if tokens.next() != Some("YUV4MPEG2") {
        return Err("missing YUV4MPEG2 signature".into());
    }

    let mut width = None;
    let mut height = None;
    let mut rate = None;
    let mut codec = Codec::RawI420;

    for token in tokens.filter(|t| !t.is_empty()) {
        let mut chars = token.chars();
        let Some(tag) = chars.next() else { continue };
        let value = chars.as_str();
        match tag {
            'W' => width = value.parse::<u32>().ok(),
            'H' => height = value.parse::<u32>().ok(),
            'F' => rate = parse_ratio(value),
            'C' => {
                codec = match value {
                    "420jpeg" | "420paldv" | "420mpeg2" | "420" => Codec::RawI420,
                    "444" => Codec::RawI444,
                    "mono" => Codec::RawMono,
                    other => return Err(format!("colour space {} not supported", other)),
                }
            }
            // Interlacing, aspect and extensions don't affect decoding
            _ => {}
        }
    }

    match (width, height, rate) {
        (Some(width), Some(height), Some(rate))
            if (1..=MAX_DIMENSION).contains(&width) && (1..=MAX_DIMENSION).contains(&height) =>
        {
            Ok(Header {
                width,
                height,
                rate,
                codec,
            })
        }
        (_, _, None) => Err("missing or invalid frame rate".into()),
        _ => Err("missing or invalid frame size".into()),
    }
}

fn parse_ratio(value: &str) -> Option<(u32, u32)> {
    let (num, den) = value.split_once(':')?;
    let num = num.parse::<u32>().ok()?;
    let den = den.parse::<u32>().ok()?;
    (num > 0 && den > 0).then_some((num, den))
}
