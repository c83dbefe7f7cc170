use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat};
use ringbuf::traits::{Consumer as _, Producer as _, Split as _};
use ringbuf::HeapRb;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::collections::BTreeMap;
use std::f32::consts::PI;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Fixed analysis block size: one feature snapshot per 512 captured samples.
pub const ANALYSIS_BLOCK: usize = 512;

pub const FEATURE_NAMES: &[&str] = &["rms", "energy", "centroid", "flatness"];

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FeatureBlock {
    pub rms: f32,
    pub energy: f32,
    pub centroid: f32,
    pub flatness: f32,
}

impl FeatureBlock {
    pub fn value(&self, name: &str) -> Option<f32> {
        match name {
            "rms" => Some(self.rms),
            "energy" => Some(self.energy),
            "centroid" => Some(self.centroid),
            "flatness" => Some(self.flatness),
            _ => None,
        }
    }
}

/// One sampled set of named feature values. Rebuilt for every tick and
/// discarded; consumers treat it as read-only.
#[derive(Clone, Debug, Default)]
pub struct FeatureSnapshot {
    values: BTreeMap<String, f32>,
}

impl FeatureSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: f32) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Pull interface the frame loop depends on. `get` returns the most recent
/// analyzed block filtered to the requested names, or None until the analyzer
/// has produced its first block.
pub trait FeatureSource {
    fn start(&mut self) -> anyhow::Result<()>;
    fn get(&self, names: &[&str]) -> Option<FeatureSnapshot>;
}

/// Seqlock-published feature block: the analysis thread writes, the frame
/// loop reads without blocking. Odd sequence values mark an in-progress write.
pub struct AtomicFeatureBlock {
    seq: AtomicU64,
    rms: AtomicU32,
    energy: AtomicU32,
    centroid: AtomicU32,
    flatness: AtomicU32,
}

impl AtomicFeatureBlock {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            rms: AtomicU32::new(0),
            energy: AtomicU32::new(0),
            centroid: AtomicU32::new(0),
            flatness: AtomicU32::new(0),
        }
    }

    pub fn store(&self, f: FeatureBlock) {
        self.seq.fetch_add(1, Ordering::Release);
        self.rms.store(f.rms.to_bits(), Ordering::Relaxed);
        self.energy.store(f.energy.to_bits(), Ordering::Relaxed);
        self.centroid.store(f.centroid.to_bits(), Ordering::Relaxed);
        self.flatness.store(f.flatness.to_bits(), Ordering::Relaxed);
        self.seq.fetch_add(1, Ordering::Release);
    }

    /// None until the first block has been stored.
    pub fn load(&self) -> Option<FeatureBlock> {
        loop {
            let v1 = self.seq.load(Ordering::Acquire);
            if v1 == 0 {
                return None;
            }
            if v1 & 1 == 1 {
                continue;
            }

            let block = FeatureBlock {
                rms: f32::from_bits(self.rms.load(Ordering::Relaxed)),
                energy: f32::from_bits(self.energy.load(Ordering::Relaxed)),
                centroid: f32::from_bits(self.centroid.load(Ordering::Relaxed)),
                flatness: f32::from_bits(self.flatness.load(Ordering::Relaxed)),
            };

            let v2 = self.seq.load(Ordering::Acquire);
            if v1 == v2 {
                return Some(block);
            }
        }
    }
}

impl Default for AtomicFeatureBlock {
    fn default() -> Self {
        Self::new()
    }
}

pub fn list_input_devices() -> anyhow::Result<()> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("enumerate input devices")?;

    let mut out = io::stdout();
    writeln!(out, "Input devices:")?;
    for dev in devices {
        let name = dev.name().unwrap_or_else(|_| "<unknown>".to_string());
        writeln!(out, "  - {}", name)?;
    }
    Ok(())
}

/// Per-block feature analysis. Owns the FFT plan and scratch buffers so the
/// analysis thread allocates nothing per block.
pub struct Analyzer {
    sample_rate_hz: u32,
    hann: Vec<f32>,
    fft: Arc<dyn rustfft::Fft<f32>>,
    fft_buf: Vec<Complex<f32>>,
    mags: Vec<f32>,
}

impl Analyzer {
    pub fn new(sample_rate_hz: u32) -> Self {
        let n = ANALYSIS_BLOCK;
        let hann = (0..n)
            .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / (n as f32)).cos())
            .collect::<Vec<_>>();
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        Self {
            sample_rate_hz,
            hann,
            fft,
            fft_buf: vec![Complex { re: 0.0, im: 0.0 }; n],
            mags: vec![0.0f32; n / 2],
        }
    }

    /// `block` must hold exactly ANALYSIS_BLOCK mono samples.
    pub fn analyze(&mut self, block: &[f32]) -> FeatureBlock {
        let n = ANALYSIS_BLOCK;
        debug_assert_eq!(block.len(), n);
        let half = n / 2;

        // energy is the summed squared amplitude over the raw block, rms its
        // normalized root; both are computed before windowing.
        let mut sq_sum = 0.0f32;
        for (i, &s) in block.iter().enumerate() {
            sq_sum += s * s;
            self.fft_buf[i].re = s * self.hann[i];
            self.fft_buf[i].im = 0.0;
        }
        let energy = sq_sum;
        let rms = (sq_sum / n as f32).sqrt().clamp(0.0, 1.0);

        self.fft.process(&mut self.fft_buf);
        for (i, c) in self.fft_buf.iter().take(half).enumerate() {
            self.mags[i] = (c.re * c.re + c.im * c.im).sqrt();
        }

        let sr = self.sample_rate_hz as f32;

        // Spectral centroid, normalized 0..1 against an 8 kHz reference.
        let mut num = 0.0f32;
        let mut den = 0.0f32;
        for i in 1..half {
            let f = (i as f32) * sr / (n as f32);
            num += f * self.mags[i];
            den += self.mags[i];
        }
        let centroid = if den > 1e-6 {
            (num / den / 8000.0).clamp(0.0, 1.0)
        } else {
            0.0
        };

        // Spectral flatness over the mid band.
        let start_bin = ((400.0 * n as f32 / sr) as usize).clamp(1, half - 1);
        let end_bin = ((6000.0 * n as f32 / sr) as usize).clamp(start_bin + 1, half);
        let mut log_gm = 0.0f32;
        let mut am = 0.0f32;
        let mut k = 0u32;
        for i in start_bin..end_bin {
            let m = self.mags[i].max(1e-6);
            log_gm += m.ln();
            am += m;
            k += 1;
        }
        let flatness = if k > 0 && am > 1e-6 {
            let gm = (log_gm / k as f32).exp();
            (gm / (am / k as f32)).clamp(0.0, 1.0)
        } else {
            0.0
        };

        FeatureBlock {
            rms,
            energy,
            centroid,
            flatness,
        }
    }
}

/// Live microphone capture plus the analysis thread feeding the published
/// feature block. Construction acquires the device; `start` begins capture.
pub struct AudioSystem {
    stream: cpal::Stream,
    stop: Arc<AtomicBool>,
    analyzer_handle: Option<thread::JoinHandle<()>>,
    cons: Option<ringbuf::HeapCons<f32>>,
    features: Arc<AtomicFeatureBlock>,
    pub sample_rate_hz: u32,
}

impl AudioSystem {
    pub fn new(device_query: Option<&str>) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = select_input_device(&host, device_query)?;
        let supported = device
            .default_input_config()
            .context("get default input config")?;
        let sample_rate_hz = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config: cpal::StreamConfig = supported.clone().into();

        let rb_capacity = (sample_rate_hz as usize).saturating_mul(2);
        let rb = HeapRb::<f32>::new(rb_capacity);
        let (mut prod, cons) = rb.split();

        let err_fn = |err| tracing::error!("audio stream error: {err}");

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _| push_interleaved(data, channels, &mut prod),
                err_fn,
                None,
            )?,
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _| push_interleaved(data, channels, &mut prod),
                err_fn,
                None,
            )?,
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _| push_interleaved(data, channels, &mut prod),
                err_fn,
                None,
            )?,
            fmt => return Err(anyhow!("unsupported sample format: {fmt:?}")),
        };

        Ok(Self {
            stream,
            stop: Arc::new(AtomicBool::new(false)),
            analyzer_handle: None,
            cons: Some(cons),
            features: Arc::new(AtomicFeatureBlock::new()),
            sample_rate_hz,
        })
    }

}

impl FeatureSource for AudioSystem {
    fn start(&mut self) -> anyhow::Result<()> {
        let Some(mut cons) = self.cons.take() else {
            // Already started.
            return Ok(());
        };

        self.stream.play().context("start input stream")?;

        let stop = Arc::clone(&self.stop);
        let features = Arc::clone(&self.features);
        let sample_rate_hz = self.sample_rate_hz;
        self.analyzer_handle = Some(thread::spawn(move || {
            analyze_loop(&mut cons, sample_rate_hz, &stop, &features)
        }));
        Ok(())
    }

    fn get(&self, names: &[&str]) -> Option<FeatureSnapshot> {
        let block = self.features.load()?;
        let mut snap = FeatureSnapshot::empty();
        for name in names {
            if let Some(v) = block.value(name) {
                snap.insert(name, v);
            }
        }
        Some(snap)
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.analyzer_handle.take() {
            let _ = h.join();
        }
    }
}

fn select_input_device(
    host: &cpal::Host,
    device_query: Option<&str>,
) -> anyhow::Result<cpal::Device> {
    let devices = host
        .input_devices()
        .context("enumerate input devices")?
        .collect::<Vec<_>>();

    let want = device_query.map(|s| s.to_lowercase());
    if let Some(want) = want.as_deref() {
        if let Some(dev) = devices.iter().find(|d| {
            d.name()
                .map(|n| n.to_lowercase().contains(want))
                .unwrap_or(false)
        }) {
            return Ok(dev.clone());
        }
        return Err(anyhow!("no input device matching: {want}"));
    }

    host.default_input_device()
        .ok_or_else(|| anyhow!("no default input device found"))
}

fn push_interleaved<T: Sample<Float = f32> + Copy>(
    data: &[T],
    channels: usize,
    prod: &mut ringbuf::HeapProd<f32>,
) {
    for frame in data.chunks(channels) {
        let mut acc = 0.0f32;
        for s in frame {
            acc += (*s).to_float_sample();
        }
        let mono = acc / channels as f32;
        let _ = prod.try_push(mono);
    }
}

fn analyze_loop(
    cons: &mut ringbuf::HeapCons<f32>,
    sample_rate_hz: u32,
    stop: &AtomicBool,
    features: &AtomicFeatureBlock,
) {
    let mut analyzer = Analyzer::new(sample_rate_hz);
    let mut block = vec![0.0f32; ANALYSIS_BLOCK];
    let mut filled = 0usize;

    while !stop.load(Ordering::Relaxed) {
        let mut got_any = false;
        while let Some(s) = cons.try_pop() {
            got_any = true;
            block[filled] = s;
            filled += 1;
            if filled == ANALYSIS_BLOCK {
                filled = 0;
                features.store(analyzer.analyze(&block));
            }
        }

        if !got_any {
            thread::sleep(Duration::from_millis(1));
        }
    }
}
