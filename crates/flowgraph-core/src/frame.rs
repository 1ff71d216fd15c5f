//! Tagged frame variant carried over channels, and the structural type
//! descriptors used to validate and render slot types.
//!
//! Every channel in a graph carries a single tagged variant, [`Frame`],
//! rather than one element type per payload kind. Resampling and
//! reformatting live as methods on [`AudioFrame`] itself, not as a concern
//! any component has to own.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::channel::ItemSize;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

fn next_frame_id() -> u64 {
    NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed)
}

fn now_pts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// A structural description of the element type carried by a slot.
///
/// Rendered for the discovery surface as either a primitive name or a
/// parametric `Container[Inner, ...]` form. Two descriptors are equal iff
/// they would render identically, which is exactly the notion
/// `Graph::create_edge` uses for type-safe wiring.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeDescriptor {
    Bytes,
    Str,
    Int,
    Float,
    Bool,
    Container(String, Vec<TypeDescriptor>),
}

impl TypeDescriptor {
    pub fn container(name: impl Into<String>, inner: Vec<TypeDescriptor>) -> Self {
        TypeDescriptor::Container(name.into(), inner)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Bytes => write!(f, "bytes"),
            TypeDescriptor::Str => write!(f, "str"),
            TypeDescriptor::Int => write!(f, "int"),
            TypeDescriptor::Float => write!(f, "float"),
            TypeDescriptor::Bool => write!(f, "bool"),
            TypeDescriptor::Container(name, inner) => {
                write!(f, "{name}[")?;
                for (i, arg) in inner.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Output sample encoding requested from [`AudioFrame::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSampleFormat {
    Pcm8,
    Pcm16,
    Float32,
}

/// Either interleaved PCM bytes or raw per-channel float samples, depending
/// on the requested [`AudioSampleFormat`].
#[derive(Debug, Clone)]
pub enum AudioData {
    Bytes(Vec<u8>),
    Float(Vec<Vec<f32>>),
}

/// Immutable audio payload with on-the-fly resampling/reformatting.
///
/// Samples are stored de-interleaved, one `Vec<f32>` per channel.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub display_name: String,
    pub pts: u64,
    pub id: u64,
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Builds a frame from interleaved 16-bit PCM bytes.
    pub fn from_pcm16(display_name: impl Into<String>, data: &[u8], sample_rate: u32, num_channels: u16) -> Self {
        let samples: Vec<f32> = data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();
        Self::from_interleaved_float(display_name, &samples, sample_rate, num_channels)
    }

    /// Builds a frame from interleaved float samples already in `[-1.0, 1.0]`.
    pub fn from_interleaved_float(
        display_name: impl Into<String>,
        interleaved: &[f32],
        sample_rate: u32,
        num_channels: u16,
    ) -> Self {
        let num_channels = num_channels.max(1) as usize;
        let mut channels = vec![Vec::with_capacity(interleaved.len() / num_channels); num_channels];
        for (i, sample) in interleaved.iter().enumerate() {
            channels[i % num_channels].push(*sample);
        }
        Self {
            display_name: display_name.into(),
            pts: now_pts(),
            id: next_frame_id(),
            channels,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_samples(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    /// Resamples (linear interpolation), remixes channel count, and encodes
    /// to the requested format.
    pub fn get(&self, sample_rate: Option<u32>, num_channels: Option<u16>, format: AudioSampleFormat) -> AudioData {
        let mut channels = self.channels.clone();

        if let Some(target_rate) = sample_rate {
            if target_rate != self.sample_rate && self.num_samples() > 0 {
                channels = channels
                    .into_iter()
                    .map(|ch| resample_linear(&ch, target_rate, self.sample_rate))
                    .collect();
            }
        }

        if let Some(target_channels) = num_channels {
            channels = remix_channels(channels, target_channels as usize);
        }

        match format {
            AudioSampleFormat::Float32 => AudioData::Float(channels),
            AudioSampleFormat::Pcm16 => AudioData::Bytes(encode_pcm16(&channels)),
            AudioSampleFormat::Pcm8 => AudioData::Bytes(encode_pcm_u8(&channels)),
        }
    }
}

fn resample_linear(channel: &[f32], target_rate: u32, source_rate: u32) -> Vec<f32> {
    if channel.is_empty() || source_rate == 0 {
        return Vec::new();
    }
    let num_samples = ((channel.len() as u64 * target_rate as u64) / source_rate as u64) as usize;
    let mut out = Vec::with_capacity(num_samples);
    for i in 0..num_samples {
        let src_pos = i as f64 * channel.len() as f64 / num_samples as f64;
        let lower = src_pos.floor() as usize;
        let upper = (lower + 1).min(channel.len() - 1);
        let frac = (src_pos - lower as f64) as f32;
        out.push(channel[lower] * (1.0 - frac) + channel[upper] * frac);
    }
    out
}

fn remix_channels(channels: Vec<Vec<f32>>, target: usize) -> Vec<Vec<f32>> {
    let current = channels.len();
    if target == current || target == 0 {
        return channels;
    }
    if target == 1 {
        let len = channels.first().map_or(0, |c| c.len());
        let mut mono = vec![0.0f32; len];
        for ch in &channels {
            for (i, s) in ch.iter().enumerate() {
                mono[i] += *s;
            }
        }
        let n = current.max(1) as f32;
        for s in &mut mono {
            *s /= n;
        }
        return vec![mono];
    }
    if target == 2 && current == 1 {
        return vec![channels[0].clone(), channels[0].clone()];
    }
    if target < current {
        channels.into_iter().take(target).collect()
    } else {
        let len = channels.first().map_or(0, |c| c.len());
        let mut out = channels;
        out.resize(target, vec![0.0f32; len]);
        out
    }
}

fn encode_pcm16(channels: &[Vec<f32>]) -> Vec<u8> {
    let mut out = Vec::new();
    for sample in interleave(channels) {
        let v = (sample * 32768.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn encode_pcm_u8(channels: &[Vec<f32>]) -> Vec<u8> {
    interleave(channels)
        .into_iter()
        .map(|sample| ((sample + 1.0) * 127.5).clamp(0.0, 255.0) as u8)
        .collect()
}

fn interleave(channels: &[Vec<f32>]) -> Vec<f32> {
    if channels.len() == 1 {
        return channels[0].clone();
    }
    let len = channels.first().map_or(0, |c| c.len());
    let mut out = Vec::with_capacity(len * channels.len());
    for i in 0..len {
        for ch in channels {
            out.push(ch[i]);
        }
    }
    out
}

/// Text payload, e.g. an ASR hypothesis or an LLM response chunk.
#[derive(Debug, Clone)]
pub struct TextFrame {
    pub display_name: String,
    pub pts: u64,
    pub id: u64,
    pub text: String,
    pub language: Option<String>,
}

impl TextFrame {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            display_name: "text".to_string(),
            pts: now_pts(),
            id: next_frame_id(),
            text: text.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// An interrupt event, e.g. VAD detecting barge-in speech.
#[derive(Debug, Clone)]
pub struct InterruptFrame {
    pub display_name: String,
    pub pts: u64,
    pub id: u64,
    pub reason: String,
}

impl InterruptFrame {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            display_name: "interrupt".to_string(),
            pts: now_pts(),
            id: next_frame_id(),
            reason: reason.into(),
        }
    }
}

/// A single turn in a chat-style conversation history.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Which projection of a [`MessagesFrame`] to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagesFormat {
    Messages,
    Text,
}

/// Either the structured turn list or the flattened text of a [`MessagesFrame`].
#[derive(Debug, Clone)]
pub enum MessagesData {
    Messages(Vec<ChatMessage>),
    Text(String),
}

/// Conversation history handed to an LLM conduit.
#[derive(Debug, Clone)]
pub struct MessagesFrame {
    pub display_name: String,
    pub pts: u64,
    pub id: u64,
    text: String,
    messages: Vec<ChatMessage>,
    pub language: Option<String>,
}

impl MessagesFrame {
    pub fn new(text: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            display_name: "messages".to_string(),
            pts: now_pts(),
            id: next_frame_id(),
            text: text.into(),
            messages,
            language: None,
        }
    }

    pub fn get(&self, format: MessagesFormat) -> MessagesData {
        match format {
            MessagesFormat::Messages => MessagesData::Messages(self.messages.clone()),
            MessagesFormat::Text => MessagesData::Text(self.text.clone()),
        }
    }
}

/// The single element type carried by every [`crate::channel::Channel`] in a
/// graph: a tagged union of the four frame kinds a pipeline passes around.
#[derive(Debug, Clone)]
pub enum Frame {
    Audio(AudioFrame),
    Text(TextFrame),
    Interrupt(InterruptFrame),
    Messages(MessagesFrame),
}

impl Frame {
    pub fn pts(&self) -> u64 {
        match self {
            Frame::Audio(f) => f.pts,
            Frame::Text(f) => f.pts,
            Frame::Interrupt(f) => f.pts,
            Frame::Messages(f) => f.pts,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Frame::Audio(f) => f.id,
            Frame::Text(f) => f.id,
            Frame::Interrupt(f) => f.id,
            Frame::Messages(f) => f.id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Frame::Audio(f) => &f.display_name,
            Frame::Text(f) => &f.display_name,
            Frame::Interrupt(f) => &f.display_name,
            Frame::Messages(f) => &f.display_name,
        }
    }

    /// The [`TypeDescriptor`] this variant renders as on a slot.
    pub fn type_descriptor(&self) -> TypeDescriptor {
        match self {
            Frame::Audio(_) => TypeDescriptor::Bytes,
            Frame::Text(_) => TypeDescriptor::Str,
            Frame::Interrupt(_) => TypeDescriptor::Str,
            Frame::Messages(_) => TypeDescriptor::container("Messages", vec![TypeDescriptor::Str]),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Audio(a) => write!(
                f,
                "AudioFrame(id={}, pts={}, sr={}Hz, channels={})",
                a.id,
                a.pts,
                a.sample_rate,
                a.num_channels()
            ),
            Frame::Text(t) => write!(f, "TextFrame(id={}, pts={}, text={:?})", t.id, t.pts, t.text),
            Frame::Interrupt(i) => write!(f, "InterruptFrame(id={}, pts={}, reason={})", i.id, i.pts, i.reason),
            Frame::Messages(m) => write!(f, "MessagesFrame(id={}, pts={}, msg_count={})", m.id, m.pts, m.messages.len()),
        }
    }
}

impl ItemSize for Frame {
    fn byte_len(&self) -> usize {
        match self {
            Frame::Audio(a) => a.channels.iter().map(|c| c.len() * 4).sum(),
            Frame::Text(t) => t.text.len(),
            Frame::Interrupt(i) => i.reason.len(),
            Frame::Messages(m) => m.text.len() + m.messages.iter().map(|msg| msg.role.len() + msg.content.len()).sum::<usize>(),
        }
    }
}
