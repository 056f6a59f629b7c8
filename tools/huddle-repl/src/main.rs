use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use anyhow::bail;
use clap::Parser;
use futures::StreamExt;
use huddle::{
    media::CaptureDevices,
    voice::{
        participant::{LocalIdentity, ParticipantId, RoomId},
        profile::{ScreenProfile, ScreenQuality},
        VoiceEventKind, VoiceEventStream, VoiceRoom,
    },
};
use huddle_mesh::{
    config::Config, host_media::HostCapture, relay::WsRelay, simple_webrtc::WebRtcConnector,
    MeshVoice,
};

mod logger;

#[derive(Parser, Debug, Eq, PartialEq)]
/// starts the huddle-repl
struct Args {
    /// participant id as known to the relay
    id: String,
    /// shown to the other participants. defaults to the id
    #[clap(long)]
    name: Option<String>,
    /// overrides the relay url from the config file
    #[clap(long)]
    relay: Option<String>,
    /// a TOML file holding a huddle-mesh config
    #[clap(long)]
    config: Option<PathBuf>,
    /// allow screen sharing. frames must be supplied by the host application
    #[clap(long)]
    screen_capture: bool,
    /// seconds to wait before reconnecting to the relay
    #[clap(long, default_value_t = 2)]
    retry: u64,
    #[clap(long, default_value = "debug")]
    log_level: log::LevelFilter,
}

/// test huddle-mesh via command line
#[derive(Parser, Debug, Eq, PartialEq)]
enum Repl {
    /// join a room, leaving the current one first
    Join { room: String },
    /// leave the current room
    Leave,
    /// mute self
    Mute,
    /// unmute self
    Unmute,
    /// deafen self. deafening also mutes
    Deafen,
    /// undeafen self
    Undeafen,
    /// start sharing the screen
    Share,
    /// stop sharing the screen
    Unshare,
    /// set the screen quality (auto, 720, 1080 or 1440) and frame rate. 0 leaves the rate unconstrained
    Profile { quality: String, frame_rate: u32 },
    /// show the participants of the current room
    Members,
    /// show the media session with each peer
    Sessions,
    /// show the room phase and local flags
    State,
    /// show available audio input devices
    ShowAvailableDevices,
    /// specify which microphone to use for input. "default" selects the host default
    ConnectMicrophone { device_name: String },
}

async fn handle_command(voice: &mut MeshVoice, cmd: Repl) -> anyhow::Result<()> {
    match cmd {
        Repl::Join { room } => {
            if room.trim().is_empty() {
                bail!("room id may not be empty");
            }
            voice.join_room(RoomId::new(room)).await?;
        }
        Repl::Leave => voice.leave_room().await?,
        Repl::Mute => voice.set_muted(true).await?,
        Repl::Unmute => voice.set_muted(false).await?,
        Repl::Deafen => voice.set_deafened(true).await?,
        Repl::Undeafen => voice.set_deafened(false).await?,
        Repl::Share => voice.start_screen_share().await?,
        Repl::Unshare => voice.stop_screen_share().await?,
        Repl::Profile {
            quality,
            frame_rate,
        } => {
            let quality = ScreenQuality::from_str(&quality)?;
            let profile = ScreenProfile::new(quality, frame_rate);
            voice.set_screen_profile(profile).await?;
            println!("screen profile: {}", profile.label());
        }
        Repl::Members => {
            let members = voice.membership().await?;
            if members.is_empty() {
                println!("not in a room");
            }
            for p in members {
                println!(
                    "{} ({}) muted: {}, deafened: {}, sharing: {}",
                    p.name(),
                    p.id,
                    p.state.muted,
                    p.state.deafened,
                    p.state.screen_sharing
                );
            }
        }
        Repl::Sessions => {
            let sessions = voice.sessions().await?;
            if sessions.is_empty() {
                println!("no sessions");
            }
            for s in sessions {
                let senders: Vec<String> = s.senders.iter().map(|k| k.to_string()).collect();
                println!(
                    "{}: {} session {}, offering: {}, negotiating: {}, degraded: {}, offers sent: {}, senders: [{}]",
                    s.participant_id,
                    s.state,
                    s.session_id,
                    s.offering,
                    s.negotiating,
                    s.degraded,
                    s.offers_sent,
                    senders.join(", ")
                );
            }
        }
        Repl::State => {
            let phase = voice.phase().await?;
            let room = voice.current_room().await?;
            let local = voice.local_state().await?;
            match room {
                Some(room) => println!("{phase} in {room}"),
                None => println!("{phase}"),
            }
            println!(
                "muted: {}, deafened: {}, sharing: {}, screen profile: {}",
                local.muted,
                local.deafened,
                local.screen_sharing,
                local.screen_profile.label()
            );
        }
        Repl::ShowAvailableDevices => {
            for device in voice.available_microphones().await? {
                println!("{device}");
            }
        }
        Repl::ConnectMicrophone { device_name } => {
            voice.select_microphone(&device_name).await?;
        }
    }
    Ok(())
}

async fn handle_voice_event_stream(mut stream: VoiceEventStream) -> anyhow::Result<()> {
    while let Some(evt) = stream.next().await {
        match evt {
            VoiceEventKind::MembershipChanged { participants } => {
                let names: Vec<&str> = participants.iter().map(|p| p.name()).collect();
                println!("members: {}", names.join(", "));
            }
            VoiceEventKind::RemoteStreamChanged {
                participant_id,
                stream: Some(stream),
            } => {
                let kinds: Vec<String> = stream.tracks.iter().map(|t| t.kind.to_string()).collect();
                println!("stream from {participant_id}: [{}]", kinds.join(", "));
            }
            VoiceEventKind::LocalStateChanged {
                muted,
                deafened,
                screen_sharing,
            } => {
                println!("muted: {muted}, deafened: {deafened}, sharing: {screen_sharing}");
            }
            evt => println!("event: {evt}"),
        }
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let path = match path {
        Some(r) => r,
        None => return Ok(Config::development()),
    };
    let text = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&text)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init_with_level(args.log_level)?;

    let mut config = load_config(args.config.as_ref())?;
    if let Some(url) = args.relay.clone() {
        *config.relay_url_mut() = Some(url);
    }
    let relay_url = match config.relay_url.clone() {
        Some(r) => r,
        None => bail!("no relay url configured"),
    };

    let identity = LocalIdentity {
        id: ParticipantId::new(args.id.clone())?,
        display_name: args.name.clone().unwrap_or_else(|| args.id.clone()),
    };

    let relay = Arc::new(WsRelay::spawn(relay_url, Duration::from_secs(args.retry)));
    let connector = Arc::new(WebRtcConnector::new(config.ice_servers.clone())?);
    let capture: Arc<dyn CaptureDevices> =
        Arc::new(HostCapture::new().with_screen_capture(args.screen_capture));

    let mut voice = MeshVoice::new(identity.clone(), relay, connector, capture, config)?;
    let voice_event_stream = voice.get_event_stream().await?;
    let voice_handle = tokio::spawn(async {
        if let Err(e) = handle_voice_event_stream(voice_event_stream).await {
            println!("handle voice event stream failed: {e}");
        }
    });

    println!("starting REPL");
    println!("enter --help to see available commands");
    println!("you are {} ({})", identity.display_name, identity.id);

    let mut iter = std::io::stdin().lines();
    while let Some(Ok(line)) = iter.next() {
        let mut v = vec![""];
        v.extend(line.split_ascii_whitespace());
        let cli = match Repl::try_parse_from(v) {
            Ok(r) => r,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        if let Err(e) = handle_command(&mut voice, cli).await {
            println!("command failed: {e}");
        }
    }

    if let Err(e) = voice.leave_room().await {
        log::debug!("leave on exit: {e}");
    }
    voice_handle.abort();

    Ok(())
}
