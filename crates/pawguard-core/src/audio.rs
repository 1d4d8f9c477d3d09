//! Best-effort audio playback.
//!
//! Sounds are played by an external player process so the daemon carries no
//! audio stack of its own. The player is started and left running in the
//! background; it is killed once the variant's maximum duration has passed.
//! The arguments follow `ffplay` conventions. Only one sound plays at a time:
//! starting a new alert stops the previous player first.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::alert::AlertDeliveryError;
use crate::config::{AlertVariant, AudioConfig};

/// Extra time a player gets to exit on its own before being killed.
const PLAYER_GRACE: Duration = Duration::from_millis(500);

/// Plays an alert sound.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Start playing `variant`. Returns once playback has started.
    ///
    /// # Errors
    ///
    /// Returns [`AlertDeliveryError`] if playback could not be started.
    async fn play(&self, variant: &AlertVariant) -> Result<(), AlertDeliveryError>;
}

/// Build the audio player selected by configuration.
#[must_use]
pub fn from_config(config: &AudioConfig) -> Box<dyn AudioPlayer> {
    if config.enabled {
        Box::new(CommandAudioPlayer::new(
            config.player.clone(),
            config.sounds_dir.clone(),
        ))
    } else {
        Box::new(NoopAudioPlayer)
    }
}

/// Player used when audio is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudioPlayer;

#[async_trait]
impl AudioPlayer for NoopAudioPlayer {
    async fn play(&self, variant: &AlertVariant) -> Result<(), AlertDeliveryError> {
        debug!(sound = %variant.filename, "Audio disabled, skipping playback");
        Ok(())
    }
}

/// Player that shells out to an external program.
#[derive(Debug)]
pub struct CommandAudioPlayer {
    program: String,
    sounds_dir: PathBuf,
    playing: Mutex<Option<Playback>>,
}

/// A running player and the task supervising it.
#[derive(Debug)]
struct Playback {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CommandAudioPlayer {
    /// Play files from `sounds_dir` with `program`.
    #[must_use]
    pub const fn new(program: String, sounds_dir: PathBuf) -> Self {
        Self {
            program,
            sounds_dir,
            playing: Mutex::new(None),
        }
    }

    /// Stop the previous player, if it is still running, and wait for it.
    async fn stop_previous(&self) {
        let previous = self
            .playing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(playback) = previous {
            let _ = playback.stop.send(());
            let _ = playback.task.await;
        }
    }

    fn command(&self, variant: &AlertVariant, path: &std::path::Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["-nodisp", "-autoexit", "-loglevel", "quiet"])
            .arg("-volume")
            .arg(variant.volume.to_string())
            .arg("-t")
            .arg(format!("{:.3}", variant.max_duration))
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl AudioPlayer for CommandAudioPlayer {
    async fn play(&self, variant: &AlertVariant) -> Result<(), AlertDeliveryError> {
        let path = self.sounds_dir.join(&variant.filename);
        if !path.is_file() {
            return Err(AlertDeliveryError::SoundMissing(path));
        }

        self.stop_previous().await;

        let child = self.command(variant, &path).spawn().map_err(|source| {
            AlertDeliveryError::AudioUnavailable {
                program: self.program.clone(),
                source,
            }
        })?;

        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(supervise(
            child,
            variant.max_duration() + PLAYER_GRACE,
            variant.filename.clone(),
            stopped,
        ));
        *self.playing.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Playback { stop, task });
        Ok(())
    }
}

/// Wait for the player to finish, killing it at `limit` or when superseded.
async fn supervise(
    mut child: Child,
    limit: Duration,
    sound: String,
    stopped: oneshot::Receiver<()>,
) {
    tokio::select! {
        waited = timeout(limit, child.wait()) => match waited {
            Ok(Ok(status)) if !status.success() => {
                warn!(%sound, %status, "Audio player exited with failure");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(%sound, error = %e, "Failed to wait for audio player"),
            Err(_) => {
                debug!(%sound, "Stopping audio player at max duration");
                let _ = child.kill().await;
            }
        },
        _ = stopped => {
            debug!(%sound, "Stopping audio player for the next alert");
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(filename: &str) -> AlertVariant {
        AlertVariant {
            filename: filename.to_string(),
            volume: 50,
            max_duration: 0.1,
        }
    }

    #[tokio::test]
    async fn test_missing_sound_file() {
        let dir = tempfile::tempdir().unwrap();
        let player = CommandAudioPlayer::new("ffplay".to_string(), dir.path().to_path_buf());
        let err = player.play(&variant("nope.wav")).await.unwrap_err();
        assert!(matches!(err, AlertDeliveryError::SoundMissing(_)));
    }

    #[tokio::test]
    async fn test_missing_player_program() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hiss.wav"), b"RIFF").unwrap();
        let player = CommandAudioPlayer::new(
            "pawguard-no-such-player".to_string(),
            dir.path().to_path_buf(),
        );
        let err = player.play(&variant("hiss.wav")).await.unwrap_err();
        assert!(matches!(err, AlertDeliveryError::AudioUnavailable { .. }));
    }

    /// Pids recorded by the fake player, in start order.
    #[cfg(target_os = "linux")]
    async fn wait_for_pids(file: &std::path::Path, count: usize) -> Vec<u32> {
        for _ in 0..200 {
            let pids: Vec<u32> = std::fs::read_to_string(file)
                .unwrap_or_default()
                .lines()
                .filter_map(|line| line.trim().parse().ok())
                .collect();
            if pids.len() >= count {
                return pids;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fake player did not start {count} times");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_new_alert_stops_previous_player() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hiss.wav"), b"RIFF").unwrap();
        let pid_file = dir.path().join("pids");
        let script = dir.path().join("fake-player");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho $$ >> {}\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let player = CommandAudioPlayer::new(
            script.display().to_string(),
            dir.path().to_path_buf(),
        );
        let long = AlertVariant {
            filename: "hiss.wav".to_string(),
            volume: 50,
            max_duration: 30.0,
        };

        player.play(&long).await.unwrap();
        let first = wait_for_pids(&pid_file, 1).await[0];

        player.play(&long).await.unwrap();
        let pids = wait_for_pids(&pid_file, 2).await;

        assert!(
            !std::path::Path::new(&format!("/proc/{first}")).exists(),
            "previous player should have been killed and reaped"
        );
        assert!(std::path::Path::new(&format!("/proc/{}", pids[1])).exists());
    }

    #[tokio::test]
    async fn test_noop_player() {
        assert!(NoopAudioPlayer.play(&variant("hiss.wav")).await.is_ok());
    }

    #[test]
    fn test_disabled_config_builds_noop() {
        // Just exercise both branches.
        let _ = from_config(&AudioConfig::default());
        let _ = from_config(&AudioConfig {
            enabled: true,
            ..AudioConfig::default()
        });
    }
}
