//! Reference decoder using Symphonia
//!
//! `SymphoniaDecoder` implements `StreamDecoder` for local files and
//! HTTP(S)/ICY streams. Each decode session runs on its own `stream-decode`
//! thread and reports through the `DecoderSink` it was started with.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecType, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::Hint;

use crate::audio::types::{AudioFormat, PcmBuffer};
use crate::config::decode::{PACING_SLACK_MS, PAUSE_POLL_MS};
use crate::error::{Result, TapError};
use crate::session::sink::{DecoderSink, StreamDecoder};
use crate::stream::icy::{self, IcyReader};
use crate::stream::metadata::MetadataMap;

/// Convert a symphonia codec type to a human-readable name
pub fn codec_type_to_name(codec: CodecType) -> &'static str {
    use symphonia::core::codecs::*;
    match codec {
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_OPUS => "Opus",
        CODEC_TYPE_VORBIS => "Vorbis",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_PCM_U8 => "PCM 8-bit",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM 16-bit",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM 24-bit",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM 32-bit",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM 32-bit Float",
        CODEC_TYPE_PCM_F64LE | CODEC_TYPE_PCM_F64BE => "PCM 64-bit Float",
        _ => "Audio",
    }
}

/// Format hint from an HTTP content type
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    match mime.as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/aac" | "audio/aacp" | "audio/x-aac" => Some("aac"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        "audio/ogg" | "application/ogg" | "audio/vorbis" => Some("ogg"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        _ => None,
    }
}

fn extension_of(path: &str) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Map container tags to metadata keys; well-known tags get lowercase names
pub fn tags_to_map(tags: &[Tag]) -> MetadataMap {
    let mut map = MetadataMap::new();
    for tag in tags {
        let value = tag.value.to_string();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let key = match tag.std_key {
            Some(StandardTagKey::TrackTitle) => "title".to_string(),
            Some(StandardTagKey::Artist) => "artist".to_string(),
            Some(StandardTagKey::Album) => "album".to_string(),
            Some(StandardTagKey::Genre) => "genre".to_string(),
            _ => tag.key.clone(),
        };
        map.entry(key).or_insert_with(|| value.to_string());
    }
    map
}

fn symphonia_error(e: SymphoniaError) -> TapError {
    match e {
        SymphoniaError::IoError(e) => TapError::Io(e),
        other => TapError::DecodeFailure(other.to_string()),
    }
}

/// `ReadOnlySource` wants `Sync`; the reader is only ever used from the
/// decode thread, so the mutex is never contended.
struct LockedReader<R>(Mutex<R>);

impl<R: Read> Read for LockedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .read(buf)
    }
}

/// An opened source ready for probing
struct OpenedSource {
    media: Box<dyn MediaSource>,
    hint: Hint,
    metadata_rx: Option<Receiver<MetadataMap>>,
}

/// Open a local path, `file://` URL or `http(s)://` URL
fn open_source(location: &str) -> Result<OpenedSource> {
    let mut hint = Hint::new();

    if location.starts_with("http://") || location.starts_with("https://") {
        let (response, headers) = icy::connect(location)?;
        let ext = headers
            .content_type
            .as_deref()
            .and_then(extension_for_content_type)
            .map(str::to_string)
            .or_else(|| extension_of(location));
        if let Some(ext) = ext {
            hint.with_extension(&ext);
        }

        let (tx, rx) = unbounded();
        let reader = IcyReader::new(response, &headers, tx);
        let source = ReadOnlySource::new(LockedReader(Mutex::new(reader)));
        return Ok(OpenedSource {
            media: Box::new(source),
            hint,
            metadata_rx: Some(rx),
        });
    }

    let path = location.strip_prefix("file://").unwrap_or(location);
    if let Some(ext) = extension_of(path) {
        hint.with_extension(&ext);
    }
    let file = File::open(path)?;
    Ok(OpenedSource {
        media: Box::new(file),
        hint,
        metadata_rx: None,
    })
}

/// Flags shared between the decoder handle and its decode thread
#[derive(Default)]
struct DecodeControl {
    stop: AtomicBool,
    paused: AtomicBool,
}

/// Symphonia-backed `StreamDecoder`
#[derive(Default)]
pub struct SymphoniaDecoder {
    realtime: bool,
    control: Option<Arc<DecodeControl>>,
}

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pace delivery to the stream's sample rate instead of decoding as fast
    /// as possible. Network streams pace themselves; files do not.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

impl StreamDecoder for SymphoniaDecoder {
    fn start(&mut self, url: &str, sink: DecoderSink) -> Result<()> {
        self.stop();

        let control = Arc::new(DecodeControl::default());
        let thread_control = control.clone();
        let location = url.to_string();
        let realtime = self.realtime;

        // Detached: stop is signalled through the control flags
        let _handle = thread::Builder::new()
            .name("stream-decode".to_string())
            .spawn(move || run_decode(&location, &sink, &thread_control, realtime))?;

        self.control = Some(control);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(control) = &self.control {
            control.paused.store(true, Ordering::SeqCst);
        }
    }

    fn resume(&mut self) {
        if let Some(control) = &self.control {
            control.paused.store(false, Ordering::SeqCst);
        }
    }

    fn stop(&mut self) {
        if let Some(control) = self.control.take() {
            control.stop.store(true, Ordering::SeqCst);
        }
    }
}

impl Drop for SymphoniaDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_decode(location: &str, sink: &DecoderSink, control: &DecodeControl, realtime: bool) {
    log::debug!("Decode thread started for {}", location);
    let result =
        open_source(location).and_then(|source| decode_source(source, sink, control, realtime));
    match result {
        Ok(()) => sink.finished(),
        Err(e) => sink.fail(e),
    }
    log::debug!("Decode thread exiting for {}", location);
}

/// Keeps delivery close to wall-clock time
struct Pacer {
    origin: Option<Instant>,
    frames: u64,
    sample_rate: u32,
}

impl Pacer {
    fn new() -> Self {
        Self {
            origin: None,
            frames: 0,
            sample_rate: 0,
        }
    }

    fn restart(&mut self) {
        self.origin = None;
        self.frames = 0;
    }

    fn advance(&mut self, frames: usize, sample_rate: u32) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.restart();
        }
        let origin = *self.origin.get_or_insert_with(Instant::now);
        self.frames += frames as u64;

        let due = Duration::from_secs_f64(self.frames as f64 / sample_rate as f64);
        let elapsed = origin.elapsed();
        if due > elapsed + Duration::from_millis(PACING_SLACK_MS) {
            thread::sleep(due - elapsed);
        }
    }
}

fn decode_source(
    source: OpenedSource,
    sink: &DecoderSink,
    control: &DecodeControl,
    realtime: bool,
) -> Result<()> {
    let mss = MediaSourceStream::new(source.media, Default::default());
    let mut probed = symphonia::default::get_probe()
        .format(
            &source.hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| TapError::DecodeFailure(format!("Probe error: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| TapError::DecodeFailure("No audio track found".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| TapError::DecodeFailure(format!("Decoder creation error: {}", e)))?;
    log::info!(
        "Decoding {} ({} Hz, {} ch)",
        codec_type_to_name(codec_params.codec),
        codec_params.sample_rate.unwrap_or(0),
        codec_params.channels.map(|c| c.count()).unwrap_or(0)
    );

    let mut tags = probed
        .metadata
        .get()
        .and_then(|m| m.current().map(|rev| tags_to_map(rev.tags())))
        .unwrap_or_default();
    if let Some(rev) = format.metadata().current() {
        for (k, v) in tags_to_map(rev.tags()) {
            tags.entry(k).or_insert(v);
        }
    }
    if !tags.is_empty() {
        sink.metadata(tags);
    }

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut current: Option<AudioFormat> = None;
    let mut pacer = Pacer::new();

    loop {
        if control.paused.load(Ordering::SeqCst) {
            while control.paused.load(Ordering::SeqCst) && !control.stop.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(PAUSE_POLL_MS));
            }
            pacer.restart();
        }
        if control.stop.load(Ordering::SeqCst) || !sink.is_active() {
            return Ok(());
        }

        if let Some(rx) = &source.metadata_rx {
            for map in rx.try_iter() {
                sink.metadata(map);
            }
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                // Clean EOF
                return Ok(());
            }
            Err(e) => return Err(symphonia_error(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                sink.recoverable_error(TapError::DecodeFailure(msg.to_string()));
                continue;
            }
            Err(e) => return Err(symphonia_error(e)),
        };

        let spec = *decoded.spec();
        let capacity = decoded.capacity();
        let audio_format = AudioFormat::interleaved_f32(spec.rate, spec.channels.count() as u16);

        if current != Some(audio_format) {
            match sink.track_prepared(&audio_format) {
                Ok(descriptor) => log::debug!(
                    "Tap {} prepared for {}",
                    descriptor.id(),
                    descriptor.format()
                ),
                Err(TapError::TapUnavailable(_)) => {}
                Err(e) => return Err(e),
            }
            current = Some(audio_format);
        }

        if sample_buf.as_ref().map_or(true, |b| b.capacity() < capacity) {
            sample_buf = Some(SampleBuffer::new(capacity as u64, spec));
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            let samples = buf.samples();
            let frames = samples.len() / audio_format.channels.max(1) as usize;
            if frames == 0 {
                continue;
            }
            sink.decoded(&PcmBuffer::F32(samples), frames, &audio_format);
            if realtime {
                pacer.advance(frames, audio_format.sample_rate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tap::AudioTap;
    use crate::audio::types::PlaybackState;
    use crate::session::observer::{ChannelObserver, SessionEvent};
    use crate::session::{SessionOptions, StreamSession};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    /// Build a minimal valid WAV file in memory
    fn make_wav(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let bits_per_sample: u16 = 16;
        let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
        let block_align = channels * (bits_per_sample / 8);
        let data_size = (samples.len() * 2) as u32;
        let file_size = 36 + data_size;

        let mut buf = Vec::new();
        // RIFF header
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&file_size.to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        // fmt chunk
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&byte_rate.to_le_bytes());
        buf.extend_from_slice(&block_align.to_le_bytes());
        buf.extend_from_slice(&bits_per_sample.to_le_bytes());
        // data chunk
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_size.to_le_bytes());
        for &s in samples {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        buf
    }

    /// WAV written to the temp dir, removed on drop
    struct TempWav(PathBuf);

    impl TempWav {
        fn new(name: &str, wav: &[u8]) -> Self {
            let path = std::env::temp_dir().join(format!(
                "streamtap-{}-{}.wav",
                std::process::id(),
                name
            ));
            std::fs::write(&path, wav).unwrap();
            Self(path)
        }

        fn location(&self) -> String {
            self.0.to_string_lossy().into_owned()
        }
    }

    impl Drop for TempWav {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[derive(Default)]
    struct FrameCount {
        frames: AtomicUsize,
        samples_sum: Mutex<f64>,
    }

    struct CountingTap(Arc<FrameCount>);

    impl AudioTap for CountingTap {
        fn deliver(&mut self, buffer: &PcmBuffer<'_>, frame_count: usize) {
            self.0.frames.fetch_add(frame_count, Ordering::SeqCst);
            let sum: f64 = (0..buffer.len()).map(|i| buffer.sample(i) as f64).sum();
            *self.0.samples_sum.lock().unwrap() += sum;
        }
    }

    fn wait_for_stop(rx: &Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    let done = event == SessionEvent::StateChanged(PlaybackState::Stopped);
                    events.push(event);
                    if done {
                        return events;
                    }
                }
                Err(_) => continue,
            }
        }
        panic!("session did not stop, events so far: {:?}", events);
    }

    fn play_file(
        location: &str,
        decoder: SymphoniaDecoder,
    ) -> (StreamSession, Arc<FrameCount>, Arc<ChannelObserver>, Receiver<SessionEvent>) {
        let options = SessionOptions {
            tap_enabled: true,
            metadata_enabled: true,
        };
        let session = StreamSession::new(location, options, Box::new(decoder)).unwrap();
        let counts = Arc::new(FrameCount::default());
        session.set_tap(Box::new(CountingTap(counts.clone()))).unwrap();
        let (observer, rx) = ChannelObserver::new(4096);
        let observer = Arc::new(observer.without_audio());
        session.set_observer(&observer);
        session.play();
        (session, counts, observer, rx)
    }

    // --- End-to-end decoding ---

    #[test]
    fn decode_wav_file_delivers_every_frame() {
        let samples: Vec<i16> = (0..8000).map(|i| ((i % 100) * 100) as i16).collect();
        let wav = TempWav::new("stereo", &make_wav(44100, 2, &samples));

        let (session, counts, _obs, rx) = play_file(&wav.location(), SymphoniaDecoder::new());
        let events = wait_for_stop(&rx);

        assert_eq!(events.first(), Some(&SessionEvent::StateChanged(PlaybackState::Playing)));
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Error { .. })));
        assert_eq!(counts.frames.load(Ordering::SeqCst), 4000);
        assert!(session.is_stopped());
        assert_eq!(session.stats().frames_delivered, 4000);
    }

    #[test]
    fn decode_file_url() {
        let wav = TempWav::new("fileurl", &make_wav(8000, 1, &[1000; 800]));
        let url = format!("file://{}", wav.location());

        let (_session, counts, _obs, rx) = play_file(&url, SymphoniaDecoder::new());
        wait_for_stop(&rx);
        assert_eq!(counts.frames.load(Ordering::SeqCst), 800);
        // 1000 / 32768 per sample
        let sum = *counts.samples_sum.lock().unwrap();
        assert!((sum - 800.0 * 1000.0 / 32768.0).abs() < 1e-3, "sum {}", sum);
    }

    #[test]
    fn missing_file_reports_error_then_stopped() {
        let (session, counts, _obs, rx) =
            play_file("/nonexistent/streamtap/missing.wav", SymphoniaDecoder::new());
        let events = wait_for_stop(&rx);

        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], SessionEvent::Error { kind: "Io", .. }));
        assert_eq!(counts.frames.load(Ordering::SeqCst), 0);
        assert!(session.is_stopped());
    }

    #[test]
    fn garbage_file_reports_decode_failure() {
        let junk = TempWav::new("junk", &[0x42u8; 4096]);
        let (_session, _counts, _obs, rx) = play_file(&junk.location(), SymphoniaDecoder::new());
        let events = wait_for_stop(&rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Error { kind: "DecodeFailure", .. })));
    }

    #[test]
    fn stop_halts_realtime_decoding() {
        // Ten seconds of audio, paced to wall clock
        let samples = vec![500i16; 44100 * 10];
        let wav = TempWav::new("long", &make_wav(44100, 1, &samples));
        let (session, counts, _obs, rx) =
            play_file(&wav.location(), SymphoniaDecoder::new().realtime(true));

        thread::sleep(Duration::from_millis(200));
        session.stop();
        let at_stop = counts.frames.load(Ordering::SeqCst);
        assert!(at_stop < 44100 * 10);

        thread::sleep(Duration::from_millis(200));
        assert_eq!(counts.frames.load(Ordering::SeqCst), at_stop);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events.last(),
            Some(&SessionEvent::StateChanged(PlaybackState::Stopped))
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == SessionEvent::StateChanged(PlaybackState::Stopped))
                .count(),
            1
        );
    }

    #[test]
    fn pause_holds_realtime_decoding() {
        let samples = vec![500i16; 44100 * 10];
        let wav = TempWav::new("paused", &make_wav(44100, 1, &samples));
        let (session, counts, _obs, _rx) =
            play_file(&wav.location(), SymphoniaDecoder::new().realtime(true));

        thread::sleep(Duration::from_millis(150));
        session.pause();
        let at_pause = counts.frames.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(counts.frames.load(Ordering::SeqCst), at_pause);

        session.play();
        thread::sleep(Duration::from_millis(150));
        assert!(counts.frames.load(Ordering::SeqCst) > at_pause);
        session.stop();
    }

    // --- Helpers ---

    #[test]
    fn codec_name_lookup() {
        use symphonia::core::codecs::*;
        assert_eq!(codec_type_to_name(CODEC_TYPE_MP3), "MP3");
        assert_eq!(codec_type_to_name(CODEC_TYPE_AAC), "AAC");
        assert_eq!(codec_type_to_name(CODEC_TYPE_OPUS), "Opus");
        assert_eq!(codec_type_to_name(CODEC_TYPE_FLAC), "FLAC");
        assert_eq!(codec_type_to_name(CODEC_TYPE_VORBIS), "Vorbis");
        assert_eq!(codec_type_to_name(CODEC_TYPE_PCM_S16LE), "PCM 16-bit");
        assert_eq!(codec_type_to_name(CODEC_TYPE_NULL), "Audio");
    }

    #[test]
    fn content_type_hints() {
        assert_eq!(extension_for_content_type("audio/mpeg"), Some("mp3"));
        assert_eq!(extension_for_content_type("audio/aacp"), Some("aac"));
        assert_eq!(
            extension_for_content_type("application/ogg; charset=binary"),
            Some("ogg")
        );
        assert_eq!(extension_for_content_type("AUDIO/FLAC"), Some("flac"));
        assert_eq!(extension_for_content_type("text/html"), None);
    }

    #[test]
    fn extension_ignores_query() {
        assert_eq!(extension_of("http://x/live.MP3?sid=1").as_deref(), Some("mp3"));
        assert_eq!(extension_of("/tmp/song.flac").as_deref(), Some("flac"));
        assert_eq!(extension_of("http://x/stream"), None);
    }

    #[test]
    fn tags_map_standard_keys() {
        use symphonia::core::meta::Value;
        let tags = vec![
            Tag::new(Some(StandardTagKey::TrackTitle), "TIT2", Value::String("Song".to_string())),
            Tag::new(Some(StandardTagKey::Artist), "TPE1", Value::String("Band".to_string())),
            Tag::new(None, "COMMENT", Value::String("hi".to_string())),
            Tag::new(Some(StandardTagKey::Album), "TALB", Value::String("  ".to_string())),
        ];
        let map = tags_to_map(&tags);
        assert_eq!(map["title"], "Song");
        assert_eq!(map["artist"], "Band");
        assert_eq!(map["COMMENT"], "hi");
        assert!(!map.contains_key("album"));
    }

    #[test]
    fn decoder_stop_without_start_is_harmless() {
        let mut decoder = SymphoniaDecoder::new();
        decoder.pause();
        decoder.resume();
        decoder.stop();
        decoder.stop();
    }
}
