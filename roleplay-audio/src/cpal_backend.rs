//! cpal implementation of the device seam
//!
//! cpal streams are not `Send`, so every stream is built, played and dropped
//! on its own owner thread. The handles returned to callers only hold the
//! command channel to that thread, which makes them movable into the async
//! controller. Dropping a handle stops the stream and releases the device.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BuildStreamError, Device, Host, SampleFormat, SampleRate, Stream, SupportedStreamConfig,
    SupportedStreamConfigRange,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::device::{
    AudioBackend, EndedCallback, MicrophoneStream, OutputDevice, PlaybackBuffer, PlaybackHandle,
    SampleCallback, SourceId,
};
use crate::error::{AudioError, Result};
use crate::resampler::Resampler;
use crate::{CaptureConfig, PlaybackConfig};

/// Audio device information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: u32,
}

/// Default host backend (CoreAudio, WASAPI, ALSA)
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    /// List input devices with their default configuration
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let mut devices = Vec::new();

        let default_input = host.default_input_device().and_then(|d| d.name().ok());

        for (index, device) in host
            .input_devices()
            .map_err(|e| AudioError::device(format!("Failed to enumerate devices: {}", e)))?
            .enumerate()
        {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Unknown Device {}", index));

            let (max_input_channels, default_sample_rate) = device
                .default_input_config()
                .map(|c| (c.channels(), c.sample_rate().0))
                .unwrap_or((0, 0));

            let max_output_channels = device
                .default_output_config()
                .map(|c| c.channels())
                .unwrap_or(0);

            devices.push(DeviceInfo {
                index,
                is_default: default_input.as_deref() == Some(name.as_str()),
                name,
                max_input_channels,
                max_output_channels,
                default_sample_rate,
            });
        }

        Ok(devices)
    }

    /// Print the device list for the `devices` command
    pub fn print_devices() -> Result<()> {
        let devices = Self::list_devices()?;

        println!("\n{}", "=".repeat(78));
        println!("Available Input Devices:");
        println!("{}\n", "=".repeat(78));

        for device in devices {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("{:3}: {}{}", device.index, device.name, default_marker);
            println!(
                "     Channels: IN={}, OUT={}",
                device.max_input_channels, device.max_output_channels
            );
            println!("     Sample Rate: {} Hz\n", device.default_sample_rate);
        }

        println!("{}", "=".repeat(78));
        Ok(())
    }
}

impl AudioBackend for CpalBackend {
    /// The default host can enumerate input devices. Nothing is opened.
    fn is_available(&self) -> bool {
        match cpal::default_host().input_devices() {
            Ok(_) => true,
            Err(e) => {
                warn!("Audio input API unavailable: {}", e);
                false
            }
        }
    }

    fn acquire_microphone(&self, config: &CaptureConfig) -> Result<Box<dyn MicrophoneStream>> {
        #[cfg(target_os = "macos")]
        crate::permission::ensure_microphone_access()?;

        let mic = CpalMicrophone::open(config.clone())?;
        Ok(Box::new(mic))
    }

    fn open_output(
        &self,
        config: &PlaybackConfig,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn OutputDevice>> {
        let output = CpalOutput::open(config.clone(), on_ended)?;
        Ok(Box::new(output))
    }
}

/// Translate a stream build failure, keeping permission refusals distinct
fn map_build_error(err: BuildStreamError) -> AudioError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            AudioError::unavailable("The requested device is no longer available")
        }
        BuildStreamError::BackendSpecific { err } => {
            let description = err.description.to_lowercase();
            if description.contains("permission")
                || description.contains("denied")
                || description.contains("not permitted")
            {
                AudioError::PermissionDenied(err.description)
            } else {
                AudioError::stream(format!("Failed to build stream: {}", err.description))
            }
        }
        other => AudioError::stream(format!("Failed to build stream: {}", other)),
    }
}

fn select_device(host: &Host, index: Option<usize>, input: bool) -> Result<Device> {
    let kind = if input { "input" } else { "output" };

    let device = match index {
        Some(index) => {
            let enumerate_err =
                |e: cpal::DevicesError| AudioError::device(format!("Failed to enumerate devices: {}", e));
            if input {
                host.input_devices().map_err(enumerate_err)?.nth(index)
            } else {
                host.output_devices().map_err(enumerate_err)?.nth(index)
            }
        }
        None if input => host.default_input_device(),
        None => host.default_output_device(),
    };

    device.ok_or_else(|| match index {
        Some(index) => AudioError::unavailable(format!("No {} device at index {}", kind, index)),
        None => AudioError::unavailable(format!("No default {} device found", kind)),
    })
}

/// Prefer an f32 configuration at `preferred` Hz; fall back to the default
fn pick_config<I>(ranges: I, preferred: u32, fallback: SupportedStreamConfig) -> SupportedStreamConfig
where
    I: Iterator<Item = SupportedStreamConfigRange>,
{
    ranges
        .filter(|r| r.sample_format() == SampleFormat::F32)
        .find(|r| r.min_sample_rate().0 <= preferred && preferred <= r.max_sample_rate().0)
        .map(|r| r.with_sample_rate(SampleRate(preferred)))
        .unwrap_or(fallback)
}

enum StreamCommand {
    Play(mpsc::Sender<Result<()>>),
    Stop,
}

/// Owner thread for one cpal stream
struct StreamThread {
    commands: mpsc::Sender<StreamCommand>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Build the stream on a fresh thread and report back what `build`
    /// returned alongside it
    fn spawn<T, F>(name: &str, build: F) -> Result<(Self, T)>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<(Stream, T)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<T>>();
        let (commands, command_rx) = mpsc::channel::<StreamCommand>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send(Ok(info));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Hold the stream until told to stop or the owner goes away
                while let Ok(command) = command_rx.recv() {
                    match command {
                        StreamCommand::Play(reply) => {
                            let result = stream
                                .play()
                                .map_err(|e| AudioError::stream(format!("Failed to start stream: {}", e)));
                            let _ = reply.send(result);
                        }
                        StreamCommand::Stop => break,
                    }
                }

                drop(stream);
            })
            .map_err(|e| AudioError::Internal(format!("Failed to spawn audio thread: {}", e)))?;

        let info = ready_rx
            .recv()
            .map_err(|_| AudioError::Internal("Audio thread exited during setup".to_string()))??;

        Ok((
            Self {
                commands,
                handle: Some(handle),
            },
            info,
        ))
    }

    fn play(&self) -> Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(StreamCommand::Play(reply_tx))
            .map_err(|_| AudioError::stream("Audio thread has exited"))?;
        reply_rx
            .recv()
            .map_err(|_| AudioError::stream("Audio thread has exited"))?
    }

    fn stop(&mut self) {
        let _ = self.commands.send(StreamCommand::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Audio thread panicked during shutdown");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

type CallbackSlot = Arc<Mutex<Option<SampleCallback>>>;

/// Acquired microphone. The stream is built (and the device held) on
/// acquisition; samples flow after `start`.
pub struct CpalMicrophone {
    sample_rate: u32,
    slot: CallbackSlot,
    thread: Option<StreamThread>,
}

impl CpalMicrophone {
    fn open(config: CaptureConfig) -> Result<Self> {
        let slot: CallbackSlot = Arc::new(Mutex::new(None));
        let callback_slot = Arc::clone(&slot);
        let target_rate = config.sample_rate;

        let (thread, ()) = StreamThread::spawn("roleplay-capture", move || {
            let host = cpal::default_host();
            let device = select_device(&host, config.device_index, true)?;
            let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

            let fallback = device.default_input_config().map_err(|e| {
                AudioError::unavailable(format!("Failed to get device config: {}", e))
            })?;
            let supported = match device.supported_input_configs() {
                Ok(ranges) => pick_config(ranges, target_rate, fallback),
                Err(_) => fallback,
            };

            let source_rate = supported.sample_rate().0;
            let source_channels = supported.channels() as usize;

            info!(
                "Microphone: {} ({} Hz, {} ch) -> {} Hz mono",
                device_name, source_rate, source_channels, target_rate
            );

            let mut resampler = if source_rate != target_rate {
                debug!("Creating resampler: {} Hz -> {} Hz", source_rate, target_rate);
                Some(Resampler::new(source_rate, target_rate)?)
            } else {
                None
            };

            let stream = device
                .build_input_stream(
                    &supported.config(),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        // First channel only; averaging halves a one-sided mic
                        let mono: Vec<f32> = if source_channels > 1 {
                            data.chunks(source_channels).map(|frame| frame[0]).collect()
                        } else {
                            data.to_vec()
                        };

                        let samples = match resampler.as_mut() {
                            Some(r) => match r.process(&mono) {
                                Ok(resampled) => resampled,
                                Err(e) => {
                                    error!("Resampling error: {}", e);
                                    return;
                                }
                            },
                            None => mono,
                        };

                        if samples.is_empty() {
                            return;
                        }

                        if let Some(callback) = callback_slot.lock().as_mut() {
                            callback(&samples);
                        }
                    },
                    |err| error!("Audio input stream error: {}", err),
                    None,
                )
                .map_err(map_build_error)?;

            Ok((stream, ()))
        })?;

        Ok(Self {
            sample_rate: target_rate,
            slot,
            thread: Some(thread),
        })
    }
}

impl MicrophoneStream for CpalMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, on_samples: SampleCallback) -> Result<()> {
        let thread = self
            .thread
            .as_ref()
            .ok_or_else(|| AudioError::stream("Microphone already released"))?;

        *self.slot.lock() = Some(on_samples);
        thread.play()
    }

    fn stop(&mut self) {
        self.slot.lock().take();
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
            debug!("Microphone stream closed");
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One source in the output mix
struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Arc<[f32]>,
    stopped: Arc<AtomicBool>,
}

/// Sums scheduled voices into device frames
struct Mixer {
    voices: Vec<Voice>,
    volume: f32,
}

impl Mixer {
    /// Render `data` (interleaved, `channels` wide) starting at device frame
    /// `base`. Voices that played to completion are reported in `finished`;
    /// stopped voices are dropped silently.
    fn render(&mut self, data: &mut [f32], channels: usize, base: u64, finished: &mut Vec<SourceId>) {
        data.fill(0.0);
        let channels = channels.max(1);
        let frames = (data.len() / channels) as u64;
        let end = base + frames;

        for voice in &self.voices {
            if voice.stopped.load(Ordering::Acquire) {
                continue;
            }
            let voice_end = voice.start_frame + voice.samples.len() as u64;
            let from = voice.start_frame.max(base);
            let to = voice_end.min(end);

            for pos in from..to {
                let sample = voice.samples[(pos - voice.start_frame) as usize] * self.volume;
                let frame = (pos - base) as usize * channels;
                for out in &mut data[frame..frame + channels] {
                    *out += sample;
                }
            }
        }

        self.voices.retain(|voice| {
            if voice.stopped.load(Ordering::Acquire) {
                return false;
            }
            if voice.start_frame + voice.samples.len() as u64 <= end {
                finished.push(voice.id);
                return false;
            }
            true
        });

        for out in data.iter_mut() {
            *out = out.clamp(-1.0, 1.0);
        }
    }
}

struct OutputShared {
    mixer: Mutex<Mixer>,
    /// Only advanced while `mixer` is locked
    frames_rendered: AtomicU64,
    sample_rate: u32,
}

impl OutputShared {
    /// Render one device period and advance the clock under the same lock,
    /// so a voice scheduled concurrently never lands in frames already played
    fn render(&self, data: &mut [f32], channels: usize, finished: &mut Vec<SourceId>) {
        let mut mixer = self.mixer.lock();
        let base = self.frames_rendered.load(Ordering::Acquire);
        mixer.render(data, channels, base, finished);
        self.frames_rendered
            .fetch_add((data.len() / channels.max(1)) as u64, Ordering::Release);
    }

    /// Add a voice at `requested`, or at the clock if that has passed.
    /// Returns the frame it will start at.
    fn schedule(
        &self,
        id: SourceId,
        requested: u64,
        samples: Arc<[f32]>,
        stopped: Arc<AtomicBool>,
    ) -> u64 {
        let mut mixer = self.mixer.lock();
        let start_frame = requested.max(self.frames_rendered.load(Ordering::Acquire));
        mixer.voices.push(Voice {
            id,
            start_frame,
            samples,
            stopped,
        });
        start_frame
    }
}

/// Opened speaker output with a frame-counting clock
pub struct CpalOutput {
    shared: Arc<OutputShared>,
    /// Rate the fragments are expected in
    source_rate: u32,
    resampler: Option<Resampler>,
    thread: Option<StreamThread>,
}

impl CpalOutput {
    fn open(config: PlaybackConfig, on_ended: EndedCallback) -> Result<Self> {
        let source_rate = config.sample_rate;
        let volume = config.volume;
        let device_index = config.device_index;

        let (thread, (shared, device_rate)) = StreamThread::spawn("roleplay-playback", move || {
            let host = cpal::default_host();
            let device = select_device(&host, device_index, false)?;
            let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

            let fallback = device.default_output_config().map_err(|e| {
                AudioError::unavailable(format!("Failed to get output config: {}", e))
            })?;
            let supported = match device.supported_output_configs() {
                Ok(ranges) => pick_config(ranges, source_rate, fallback),
                Err(_) => fallback,
            };

            let device_rate = supported.sample_rate().0;
            let channels = supported.channels() as usize;

            info!("Speaker: {} ({} Hz, {} ch)", device_name, device_rate, channels);

            let shared = Arc::new(OutputShared {
                mixer: Mutex::new(Mixer {
                    voices: Vec::new(),
                    volume,
                }),
                frames_rendered: AtomicU64::new(0),
                sample_rate: device_rate,
            });
            let render_shared = Arc::clone(&shared);
            let mut finished = Vec::new();

            let stream = device
                .build_output_stream(
                    &supported.config(),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        render_shared.render(data, channels, &mut finished);

                        for id in finished.drain(..) {
                            on_ended(id);
                        }
                    },
                    |err| error!("Audio output stream error: {}", err),
                    None,
                )
                .map_err(map_build_error)?;

            Ok((stream, (shared, device_rate)))
        })?;

        // The clock only advances while the stream runs
        thread.play()?;

        let resampler = if source_rate != device_rate {
            debug!("Creating resampler: {} Hz -> {} Hz", source_rate, device_rate);
            Some(Resampler::new(source_rate, device_rate)?)
        } else {
            None
        };

        Ok(Self {
            shared,
            source_rate,
            resampler,
            thread: Some(thread),
        })
    }

    fn to_device_rate(&mut self, buffer: &PlaybackBuffer) -> Result<Arc<[f32]>> {
        let device_rate = self.shared.sample_rate;

        if buffer.sample_rate() == device_rate {
            return Ok(buffer.shared_samples());
        }

        let converted = match self.resampler.as_mut() {
            Some(r) if buffer.sample_rate() == self.source_rate => r.process_all(buffer.samples())?,
            _ => Resampler::new(buffer.sample_rate(), device_rate)?.process_all(buffer.samples())?,
        };
        Ok(converted.into())
    }
}

impl OutputDevice for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.shared.frames_rendered.load(Ordering::Acquire) as f64 / self.shared.sample_rate as f64
    }

    fn start(
        &mut self,
        id: SourceId,
        buffer: &PlaybackBuffer,
        at: f64,
    ) -> Result<Box<dyn PlaybackHandle>> {
        if self.thread.is_none() {
            return Err(AudioError::OutputClosed);
        }

        let samples = self.to_device_rate(buffer)?;
        let stopped = Arc::new(AtomicBool::new(false));
        let requested = (at * self.shared.sample_rate as f64).round().max(0.0) as u64;

        let start_frame = self
            .shared
            .schedule(id, requested, samples, Arc::clone(&stopped));
        if start_frame > requested {
            debug!("{} requested frame {} but starts at {}", id, requested, start_frame);
        }

        Ok(Box::new(CpalPlaybackHandle { id, stopped }))
    }

    fn close(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
            self.shared.mixer.lock().voices.clear();
            debug!("Speaker stream closed");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

struct CpalPlaybackHandle {
    id: SourceId,
    stopped: Arc<AtomicBool>,
}

impl PlaybackHandle for CpalPlaybackHandle {
    fn id(&self) -> SourceId {
        self.id
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
    }
}
