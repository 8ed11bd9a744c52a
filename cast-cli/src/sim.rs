//! Simulation driver
//!
//! Runs one sender against a [`SimulatedLink`] on a manual clock, stepping
//! time in 1 ms increments. Encoders run inline so runs are deterministic for
//! a given seed.

use crate::config::{MediaKind, SimConfig};
use crate::link::{LinkRtcp, LinkStats, LinkTransport, SimulatedLink};
use crate::synthetic::{blank_picture, SyntheticVideoCodec, ToneGenerator};
use cast_io::{Clock, ManualClock};
use cast_protocol::CastFeedback;
use cast_sender::{
    AudioSender, InitError, InitializationStatus, Pcm16Codec, SenderCollaborators,
    SenderEnvironment, SenderStats, VideoFrame, VideoSender,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Simulation time step
pub const STEP: Duration = Duration::from_millis(1);

const TONE_FREQUENCY: f32 = 440.0;
const PICTURE_WIDTH: u32 = 320;
const PICTURE_HEIGHT: u32 = 180;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Sender failed to initialize: {0}")]
    Initialization(InitError),
}

/// Counters at one point in simulated time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimSnapshot {
    pub elapsed: Duration,
    pub sender: SenderStats,
    pub link: LinkStats,
    pub frames_in_flight: i32,
    pub round_trip_time: Duration,
}

/// Final counters of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimSummary {
    pub media: MediaKind,
    pub last: SimSnapshot,
}

enum SimSender {
    Audio {
        sender: AudioSender,
        tone: ToneGenerator,
    },
    Video {
        sender: VideoSender,
        picture: VideoFrame,
    },
}

impl SimSender {
    fn status(&self) -> &InitializationStatus {
        match self {
            SimSender::Audio { sender, .. } => sender.initialization_status(),
            SimSender::Video { sender, .. } => sender.initialization_status(),
        }
    }

    fn capture(&mut self, now: Instant) -> bool {
        match self {
            SimSender::Audio { sender, tone } => sender.insert_audio(tone.next_burst(), now),
            SimSender::Video { sender, picture } => sender.insert_video_frame(picture.clone(), now),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match self {
            SimSender::Audio { sender, .. } => sender.next_deadline(),
            SimSender::Video { sender, .. } => sender.next_deadline(),
        }
    }

    fn poll(&mut self) {
        match self {
            SimSender::Audio { sender, .. } => sender.poll(),
            SimSender::Video { sender, .. } => sender.poll(),
        }
    }

    fn on_cast_feedback(&mut self, feedback: &CastFeedback) {
        match self {
            SimSender::Audio { sender, .. } => sender.on_cast_feedback(feedback),
            SimSender::Video { sender, .. } => sender.on_cast_feedback(feedback),
        }
    }

    fn stats(&self) -> SenderStats {
        match self {
            SimSender::Audio { sender, .. } => sender.stats(),
            SimSender::Video { sender, .. } => sender.stats(),
        }
    }

    fn in_flight_and_rtt(&self) -> (i32, Duration) {
        let controller = match self {
            SimSender::Audio { sender, .. } => sender
                .controller()
                .map(|c| (c.frames_in_flight(), c.current_round_trip_time())),
            SimSender::Video { sender, .. } => sender
                .controller()
                .map(|c| (c.frames_in_flight(), c.current_round_trip_time())),
        };
        controller.unwrap_or_default()
    }
}

/// Run a simulation to completion
///
/// `on_stats` is called every stats interval of simulated time.
pub fn run<F>(config: &SimConfig, mut on_stats: F) -> Result<SimSummary, SimError>
where
    F: FnMut(&SimSnapshot),
{
    config.validate()?;

    let clock = Arc::new(ManualClock::new());
    let env = SenderEnvironment::inline(clock.clone());
    let link = Arc::new(Mutex::new(SimulatedLink::new(clock.clone(), &config.link)));
    let collaborators = SenderCollaborators::new(LinkTransport(link.clone()), LinkRtcp(link.clone()));

    let (mut sender, capture_interval) = match config.media {
        MediaKind::Audio => {
            let audio = &config.audio;
            let sender = AudioSender::new(&env, audio, Pcm16Codec::new(), collaborators);
            let tone = ToneGenerator::new(audio.channels as usize, audio.sampling_rate, TONE_FREQUENCY);
            (SimSender::Audio { sender, tone }, Duration::from_millis(10))
        }
        MediaKind::Video => {
            let video = &config.video;
            let codec = SyntheticVideoCodec::new(video.max_frame_rate);
            let sender = VideoSender::new(&env, video, codec, collaborators);
            let picture = blank_picture(PICTURE_WIDTH, PICTURE_HEIGHT);
            let interval = Duration::from_secs_f64(1.0 / video.max_frame_rate);
            (SimSender::Video { sender, picture }, interval)
        }
    };
    if let Some(err) = sender.status().error() {
        return Err(SimError::Initialization(err.clone()));
    }

    info!(
        "Simulating {:?} for {:?}: {}% loss, {:?} one-way delay",
        config.media,
        config.duration(),
        config.link.loss_percent,
        config.link.one_way_delay()
    );

    let start = clock.now();
    let end = start + config.duration();
    let mut next_capture = start;
    let mut next_stats = start + config.stats_interval();

    let snapshot = |sender: &SimSender, now: Instant| {
        let (frames_in_flight, round_trip_time) = sender.in_flight_and_rtt();
        SimSnapshot {
            elapsed: now - start,
            sender: sender.stats(),
            link: link.lock().stats(),
            frames_in_flight,
            round_trip_time,
        }
    };

    while clock.now() < end {
        let now = clock.now();

        if now >= next_capture {
            if !sender.capture(now) {
                debug!("Capture at {:?} dropped", now - start);
            }
            next_capture += capture_interval;
        }

        if sender.next_deadline().map_or(false, |deadline| deadline <= now) {
            sender.poll();
        }

        // The link lock must be released before the sender reacts to feedback
        let feedback = link.lock().step(now);
        for message in &feedback {
            sender.on_cast_feedback(message);
        }

        if now >= next_stats {
            on_stats(&snapshot(&sender, now));
            next_stats += config.stats_interval();
        }

        clock.advance(STEP);
    }

    let last = snapshot(&sender, clock.now());
    info!(
        "Simulation finished: {} frames encoded, {} dropped, {} packets lost",
        last.sender.frames_encoded, last.sender.frames_dropped, last.link.packets_lost
    );
    Ok(SimSummary {
        media: config.media,
        last,
    })
}
