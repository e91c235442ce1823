use std::fs::File;
use std::path::Path;

use anyhow::Result;
use symphonia::core::{
    formats::{FormatOptions, FormatReader},
    io::MediaSourceStream,
    meta::{MetadataOptions, StandardTagKey},
    probe::Hint
};

/// One MPEG audio frame header, decoded from the fixed 4 leading bytes.
/// Only Layer III is recognized, everything the station airs is MP3.
/// http://www.mp3-tech.org/programmer/frame_header.html
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHeader {
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub samples: u32
}

const BITRATES_V1_L3: [u32; 14] = [32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L3: [u32; 14] = [8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

impl FrameHeader {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 4 || buf[0] != 0xff || buf[1] & 0xe0 != 0xe0 {
            return None;
        }

        // 00 = MPEG 2.5, 10 = MPEG 2, 11 = MPEG 1
        let version = (buf[1] >> 3) & 0b11;
        // 01 = Layer III
        let layer   = (buf[1] >> 1) & 0b11;
        if version == 0b01 || layer != 0b01 {
            return None;
        }

        let bitrate_index = (buf[2] >> 4) as usize;
        if bitrate_index == 0 || bitrate_index == 15 {
            // Free-form and invalid bitrates are not worth pacing against
            return None;
        }
        let bitrate_kbps = if version == 0b11 {
            BITRATES_V1_L3[bitrate_index - 1]
        } else {
            BITRATES_V2_L3[bitrate_index - 1]
        };

        let sample_rate = match ((buf[2] >> 2) & 0b11, version) {
            (0b00, 0b11) => 44100,
            (0b01, 0b11) => 48000,
            (0b10, 0b11) => 32000,
            (0b00, 0b10) => 22050,
            (0b01, 0b10) => 24000,
            (0b10, 0b10) => 16000,
            (0b00, 0b00) => 11025,
            (0b01, 0b00) => 12000,
            (0b10, 0b00) => 8000,
            _ => return None
        };

        let samples = if version == 0b11 { 1152 } else { 576 };

        Some(FrameHeader { bitrate_kbps, sample_rate, samples })
    }
}

/// One raw MP3 frame plus the timing the producer needs to pace it
pub struct Frame {
    pub data: Box<[u8]>,
    pub bitrate_kbps: Option<u32>,
    pub sample_rate: u32,
    pub samples: u32
}

impl Frame {
    /// Real-time duration of this frame in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        1000 * self.samples as u64 / self.sample_rate as u64
    }
}

/// Sequential frame reader over a single MP3 file. Garbage between frames is
/// handled by the demuxer's resync; there is no seeking, a consumer that
/// wants the first frame again reopens the file.
pub struct FrameReader {
    format: Box<dyn FormatReader>,
    track_id: u32,
    sample_rate: Option<u32>
}

impl FrameReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mss  = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("mp3");

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions    = Default::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)?;

        let format = probed.format;
        let (track_id, sample_rate) = {
            let track = format.default_track()
                .ok_or_else(|| anyhow::Error::msg("File contains no audio track"))?;
            (track.id, track.codec_params.sample_rate)
        };

        Ok(FrameReader { format, track_id, sample_rate })
    }

    /// Next raw frame, or None once the file is exhausted or unreadable.
    /// Decode errors are not distinguished from end of file, either way the
    /// track is over for broadcast purposes.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(v) => v,
                Err(_) => return None
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let header      = FrameHeader::parse(&packet.data);
            let sample_rate = self.sample_rate
                .or(header.map(|h| h.sample_rate))
                .unwrap_or(44100);
            let samples = if packet.dur > 0 {
                packet.dur as u32
            } else {
                header.map(|h| h.samples).unwrap_or(1152)
            };

            return Some(Frame {
                bitrate_kbps: header.map(|h| h.bitrate_kbps),
                sample_rate,
                samples,
                data: packet.data
            });
        }
    }
}

/// What a single probing pass over a file can tell without disturbing the
/// producer: ID3 title/artist and the rates of the first frame
#[derive(Default)]
pub struct TrackProbe {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub sample_rate: Option<u32>,
    pub bitrate_kbps: Option<u32>
}

pub fn inspect(path: &Path) -> Result<TrackProbe> {
    let file = File::open(path)?;
    let mss  = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions    = Default::default();

    let mut probed = symphonia::default::get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)?;

    let mut info = TrackProbe::default();

    // ID3v2 sits in front of the stream and ends up in the probe metadata,
    // anything in-band lands on the format reader instead
    if let Some(metadata) = probed.metadata.get() {
        if let Some(rev) = metadata.current() {
            collect_tags(rev.tags(), &mut info);
        }
    }
    if let Some(rev) = probed.format.metadata().current() {
        collect_tags(rev.tags(), &mut info);
    }

    info.sample_rate = probed.format.default_track()
        .and_then(|t| t.codec_params.sample_rate);

    if let Ok(packet) = probed.format.next_packet() {
        if let Some(header) = FrameHeader::parse(&packet.data) {
            info.bitrate_kbps = Some(header.bitrate_kbps);
            if info.sample_rate.is_none() {
                info.sample_rate = Some(header.sample_rate);
            }
        }
    }

    Ok(info)
}

fn collect_tags(tags: &[symphonia::core::meta::Tag], info: &mut TrackProbe) {
    for tag in tags {
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) if info.title.is_none() => {
                let v = tag.value.to_string();
                if !v.is_empty() {
                    info.title = Some(v);
                }
            },
            Some(StandardTagKey::Artist) if info.artist.is_none() => {
                let v = tag.value.to_string();
                if !v.is_empty() {
                    info.artist = Some(v);
                }
            },
            _ => ()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mpeg1_layer3_header() {
        // 128 kbps, 32000 Hz, no padding
        let header = FrameHeader::parse(&[0xff, 0xfb, 0x98, 0xc0]).unwrap();
        assert_eq!(header.bitrate_kbps, 128);
        assert_eq!(header.sample_rate, 32000);
        assert_eq!(header.samples, 1152);
    }

    #[test]
    fn parses_mpeg2_layer3_header() {
        // MPEG 2, 64 kbps, 22050 Hz
        let header = FrameHeader::parse(&[0xff, 0xf3, 0x80, 0xc0]).unwrap();
        assert_eq!(header.bitrate_kbps, 64);
        assert_eq!(header.sample_rate, 22050);
        assert_eq!(header.samples, 576);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(FrameHeader::parse(&[0x00, 0x00, 0x00, 0x00]), None);
        assert_eq!(FrameHeader::parse(&[0xff, 0xfb]), None);
        // Free-form bitrate
        assert_eq!(FrameHeader::parse(&[0xff, 0xfb, 0x00, 0xc0]), None);
    }

    #[test]
    fn reads_frames_from_a_synthetic_file() {
        let dir = std::env::temp_dir().join("castradio-frame-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tone.mp3");
        test_utils::write_cbr_mp3(&path, 20);

        let mut reader = FrameReader::open(&path).unwrap();
        let mut frames = 0;
        let mut bytes  = 0;
        while let Some(frame) = reader.next_frame() {
            assert_eq!(frame.sample_rate, test_utils::FRAME_SAMPLE_RATE);
            assert_eq!(frame.samples, 1152);
            assert_eq!(frame.duration_ms(), test_utils::FRAME_DURATION_MS);
            frames += 1;
            bytes  += frame.data.len();
        }
        assert_eq!(frames, 20);
        assert_eq!(bytes, 20 * test_utils::FRAME_LEN);
    }

    #[test]
    fn inspect_reports_first_frame_rates() {
        let dir = std::env::temp_dir().join("castradio-frame-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("probe.mp3");
        test_utils::write_cbr_mp3(&path, 5);

        let info = inspect(&path).unwrap();
        assert_eq!(info.sample_rate, Some(test_utils::FRAME_SAMPLE_RATE));
        assert_eq!(info.bitrate_kbps, Some(128));
        assert_eq!(info.title, None);
        assert_eq!(info.artist, None);
    }
}
