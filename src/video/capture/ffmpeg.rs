//! ffmpeg-decoded sources
//!
//! ffmpeg decodes the input and writes an MJPEG image pipe to stdout. A
//! reader thread splits the pipe on SOI/EOI markers and keeps only the
//! newest frame, so a slow consumer never builds up latency.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::{CaptureAdapter, CaptureSettings};
use crate::error::{AppError, Result};
use crate::video::encoder::JpegEncoder;
use crate::video::locator::StreamScheme;

const READ_CHUNK: usize = 64 * 1024;
/// Drop a partial frame that grows past this without an EOI marker
const MAX_PENDING: usize = 16 * 1024 * 1024;
/// ffmpeg's own MJPEG quality scale (2 = best, 31 = worst)
const PIPE_QSCALE: &str = "3";

/// What ffmpeg reads from
#[derive(Debug, Clone, PartialEq)]
pub enum FfmpegInput {
    /// Local device through the v4l2 demuxer
    Device(u32),
    Network {
        scheme: StreamScheme,
        url: String,
        /// Disable input buffering and shrink probing
        low_latency: bool,
    },
}

impl FfmpegInput {
    fn describe(&self) -> String {
        match self {
            FfmpegInput::Device(index) => format!("device:{}", index),
            FfmpegInput::Network { url, .. } => url.clone(),
        }
    }

    /// Command line for this input, excluding the ffmpeg binary
    pub fn args(&self, settings: &CaptureSettings) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match self {
            FfmpegInput::Device(index) => {
                args.extend([
                    "-f".to_string(),
                    "v4l2".to_string(),
                    "-framerate".to_string(),
                    settings.framerate.to_string(),
                    "-video_size".to_string(),
                    settings.resolution.to_string(),
                    "-i".to_string(),
                    format!("/dev/video{}", index),
                ]);
            }
            FfmpegInput::Network {
                scheme,
                url,
                low_latency,
            } => {
                let mut input = url.clone();
                if *low_latency {
                    args.extend(
                        [
                            "-fflags",
                            "nobuffer",
                            "-flags",
                            "low_delay",
                            "-probesize",
                            "32768",
                            "-analyzeduration",
                            "500000",
                        ]
                        .iter()
                        .map(|s| s.to_string()),
                    );
                    match scheme {
                        StreamScheme::Rtsp => {
                            args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
                        }
                        StreamScheme::Udp if !url.contains('?') => {
                            input.push_str("?fifo_size=500000&overrun_nonfatal=1");
                        }
                        _ => {}
                    }
                }
                args.extend(["-i".to_string(), input]);
            }
        }

        args.extend([
            "-an".to_string(),
            "-vf".to_string(),
            format!(
                "scale={}:{}",
                settings.resolution.width, settings.resolution.height
            ),
            "-r".to_string(),
            settings.framerate.to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-c:v".to_string(),
            "mjpeg".to_string(),
            "-q:v".to_string(),
            PIPE_QSCALE.to_string(),
            "pipe:1".to_string(),
        ]);
        args
    }
}

/// Cut the first complete JPEG out of `pending`
///
/// Bytes before the first SOI are discarded; an incomplete frame stays in
/// the buffer for the next call.
pub fn extract_jpeg(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let soi = pending.windows(2).position(|w| w == [0xFF, 0xD8]);
    let Some(soi) = soi else {
        // Keep a trailing 0xFF that may start the next marker
        let keep = usize::from(pending.last() == Some(&0xFF));
        let drop_to = pending.len() - keep;
        pending.drain(..drop_to);
        return None;
    };
    if soi > 0 {
        pending.drain(..soi);
    }

    let eoi = pending[2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])
        .map(|p| p + 2)?;

    let frame: Vec<u8> = pending.drain(..eoi + 2).collect();
    Some(frame)
}

#[derive(Default)]
struct Slot {
    latest: Option<Vec<u8>>,
    frames: u64,
    ended: bool,
}

/// Newest-frame mailbox shared with the reader thread
#[derive(Default)]
struct FrameSlot {
    state: Mutex<Slot>,
    ready: Condvar,
}

impl FrameSlot {
    fn publish(&self, frame: Vec<u8>) {
        let mut slot = self.state.lock();
        slot.latest = Some(frame);
        slot.frames += 1;
        self.ready.notify_all();
    }

    fn finish(&self) {
        self.state.lock().ended = true;
        self.ready.notify_all();
    }

    /// Wait up to `timeout` for a frame or the end of the pipe
    fn wait_ready(&self, timeout: Duration) -> (u64, bool) {
        let deadline = Instant::now() + timeout;
        let mut slot = self.state.lock();
        while slot.frames == 0 && !slot.ended {
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        (slot.frames, slot.ended)
    }

    fn take(&self, timeout: Duration) -> std::result::Result<Vec<u8>, &'static str> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.state.lock();
        loop {
            if let Some(frame) = slot.latest.take() {
                return Ok(frame);
            }
            if slot.ended {
                return Err("ffmpeg exited");
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.latest.take().ok_or("no frame before timeout");
            }
        }
    }
}

fn pump(mut stdout: ChildStdout, slot: Arc<FrameSlot>) {
    let mut pending = Vec::with_capacity(READ_CHUNK * 4);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                let mut newest = None;
                while let Some(frame) = extract_jpeg(&mut pending) {
                    newest = Some(frame);
                }
                if let Some(frame) = newest {
                    slot.publish(frame);
                }
                if pending.len() > MAX_PENDING {
                    warn!("Discarding {} bytes without a JPEG end marker", pending.len());
                    pending.clear();
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("ffmpeg pipe read failed: {}", e);
                break;
            }
        }
    }
    slot.finish();
    trace!("ffmpeg reader finished");
}

pub struct FfmpegAdapter {
    source: String,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    slot: Arc<FrameSlot>,
    encoder: JpegEncoder,
    read_timeout: Duration,
    label: &'static str,
}

impl FfmpegAdapter {
    /// Spawn ffmpeg and wait for it to prove the input works
    ///
    /// Counts as opened once a frame arrives, or if ffmpeg is still running
    /// when the probe window ends (slow network warm-up).
    pub fn open(input: FfmpegInput, settings: &CaptureSettings) -> Result<Self> {
        let source = input.describe();
        let open_err = |reason: String| AppError::DeviceOpen {
            locator: source.clone(),
            reason,
        };

        let encoder = JpegEncoder::new(settings.jpeg_quality)?;
        let args = input.args(settings);
        debug!("Spawning {} {}", settings.ffmpeg_path, args.join(" "));

        let mut child = Command::new(&settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| open_err(format!("Failed to spawn {}: {}", settings.ffmpeg_path, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| open_err("ffmpeg stdout unavailable".to_string()))?;

        let slot = Arc::new(FrameSlot::default());
        let reader = {
            let slot = slot.clone();
            std::thread::Builder::new()
                .name("ffmpeg-reader".to_string())
                .spawn(move || pump(stdout, slot))
                .map_err(|e| open_err(format!("Failed to start reader thread: {}", e)))?
        };

        let label = match &input {
            FfmpegInput::Device(_) => "ffmpeg/v4l2",
            FfmpegInput::Network {
                low_latency: true, ..
            } => "ffmpeg/low-latency",
            FfmpegInput::Network { .. } => "ffmpeg",
        };

        let mut adapter = Self {
            source: source.clone(),
            child: Some(child),
            reader: Some(reader),
            slot,
            encoder,
            read_timeout: settings.read_timeout,
            label,
        };

        let (frames, ended) = adapter.slot.wait_ready(settings.probe_window);
        if frames == 0 && ended {
            adapter.close();
            return Err(open_err(format!("{} produced no output", label)));
        }
        if frames == 0 {
            debug!("{} still warming up after probe window", source);
        }

        Ok(adapter)
    }
}

impl CaptureAdapter for FfmpegAdapter {
    fn read_frame(&mut self) -> Result<Bytes> {
        if self.child.is_none() {
            return Err(AppError::TransientRead(format!("{} is closed", self.source)));
        }

        let frame = self
            .slot
            .take(self.read_timeout)
            .map_err(|reason| AppError::TransientRead(format!("{}: {}", self.source, reason)))?;

        self.encoder
            .reencode_jpeg(&frame)
            .map_err(|e| AppError::TransientRead(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("ffmpeg for {} already gone: {}", self.source, e);
            }
            let _ = child.wait();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }

    fn backend(&self) -> &str {
        self.label
    }
}

impl Drop for FfmpegAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoConfig;

    fn settings() -> CaptureSettings {
        CaptureSettings::from_config(&VideoConfig::default(), "720p", 25)
    }

    #[test]
    fn test_extract_single_frame() {
        let mut pending = vec![0x00, 0x11, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0xFF, 0xD8, 0x05];
        let frame = extract_jpeg(&mut pending).unwrap();
        assert_eq!(frame, vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
        // The next frame's start stays buffered
        assert_eq!(pending, vec![0xFF, 0xD8, 0x05]);
        assert!(extract_jpeg(&mut pending).is_none());
        assert_eq!(pending, vec![0xFF, 0xD8, 0x05]);
    }

    #[test]
    fn test_extract_discards_garbage() {
        let mut pending = vec![0x01, 0x02, 0x03, 0xFF];
        assert!(extract_jpeg(&mut pending).is_none());
        assert_eq!(pending, vec![0xFF]);

        pending.extend_from_slice(&[0xD8, 0xFF, 0xD9]);
        assert_eq!(
            extract_jpeg(&mut pending).unwrap(),
            vec![0xFF, 0xD8, 0xFF, 0xD9]
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn test_low_latency_rtsp_args() {
        let input = FfmpegInput::Network {
            scheme: StreamScheme::Rtsp,
            url: "rtsp://10.5.5.9:554/live".into(),
            low_latency: true,
        };
        let args = input.args(&settings());
        let joined = args.join(" ");
        assert!(joined.contains("-fflags nobuffer"));
        assert!(joined.contains("-rtsp_transport tcp"));
        assert!(joined.contains("-i rtsp://10.5.5.9:554/live"));
        assert!(joined.contains("scale=1280:720"));
        assert!(joined.ends_with("-f image2pipe -c:v mjpeg -q:v 3 pipe:1"));
    }

    #[test]
    fn test_udp_fifo_and_plain_fallback() {
        let low = FfmpegInput::Network {
            scheme: StreamScheme::Udp,
            url: "udp://10.5.5.9:8554".into(),
            low_latency: true,
        };
        assert!(low
            .args(&settings())
            .contains(&"udp://10.5.5.9:8554?fifo_size=500000&overrun_nonfatal=1".to_string()));

        let plain = FfmpegInput::Network {
            scheme: StreamScheme::Udp,
            url: "udp://10.5.5.9:8554".into(),
            low_latency: false,
        };
        let args = plain.args(&settings());
        assert!(!args.contains(&"nobuffer".to_string()));
        assert!(args.contains(&"udp://10.5.5.9:8554".to_string()));
    }

    #[test]
    fn test_device_args() {
        let args = FfmpegInput::Device(2).args(&settings()).join(" ");
        assert!(args.contains("-f v4l2 -framerate 25 -video_size 1280x720 -i /dev/video2"));
    }

    #[test]
    fn test_missing_binary_fails_open() {
        let mut s = settings();
        s.ffmpeg_path = "/nonexistent/ffmpeg-binary".into();
        let err = FfmpegAdapter::open(FfmpegInput::Device(0), &s).err().unwrap();
        assert!(matches!(err, AppError::DeviceOpen { .. }));
    }

    #[test]
    fn test_slot_keeps_newest() {
        let slot = FrameSlot::default();
        slot.publish(vec![1]);
        slot.publish(vec![2]);
        assert_eq!(slot.take(Duration::from_millis(10)).unwrap(), vec![2]);
        assert!(slot.take(Duration::from_millis(10)).is_err());
        slot.finish();
        assert_eq!(slot.take(Duration::from_secs(5)), Err("ffmpeg exited"));
    }
}
