use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("could not stage clip for playback: {0}")]
    Stage(#[from] std::io::Error),

    #[error("player {program} exited with status {status}")]
    Player { program: String, status: String },

    #[error("could not start player {program}: {reason}")]
    Spawn { program: String, reason: String },
}

/// An audio output device. `play` resolves when the clip ends; dropping the
/// future must stop output.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, clip: &[u8]) -> Result<(), PlaybackError>;
}

/// Plays clips by handing a temp file to an external player such as `afplay`.
#[derive(Debug, Clone)]
pub struct CommandSink {
    pub program: String,
    pub args: Vec<String>,
    pub volume: f32,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>, volume: f32) -> Self {
        Self {
            program: program.into(),
            args,
            volume,
        }
    }

    fn expand_args(&self) -> Vec<String> {
        let pct = ((self.volume * 100.0).round() as i32).to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{volume_pct}", &pct)
                    .replace("{volume}", &self.volume.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl AudioSink for CommandSink {
    async fn play(&self, clip: &[u8]) -> Result<(), PlaybackError> {
        let temp = tempfile::Builder::new()
            .prefix("announcement-")
            .suffix(clip_extension(clip))
            .tempfile()?;
        tokio::fs::write(temp.path(), clip).await?;

        let mut child = Command::new(&self.program)
            .args(self.expand_args())
            .arg(temp.path())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| PlaybackError::Spawn {
                program: self.program.clone(),
                reason: err.to_string(),
            })?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(PlaybackError::Player {
                program: self.program.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

/// File suffix players use to pick a decoder.
pub fn clip_extension(clip: &[u8]) -> &'static str {
    if clip.starts_with(b"RIFF") {
        ".wav"
    } else if clip.starts_with(b"OggS") {
        ".ogg"
    } else {
        ".mp3"
    }
}
