//! Argument parsing and command execution for the `profilesync` binary.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use profilesync_engine::{ChangeNotifier, ManagerConfig, ProfileEvent, ProfileManager};
use profilesync_store::{FileProfileStore, ProfileStore};
use profilesync_types::{Profile, ProfileId};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "profilesync")]
#[command(about = "Keep VPN profiles in sync between devices")]
pub struct Args {
    /// Directory holding this device's profiles
    #[arg(short, long)]
    pub local: PathBuf,

    /// Shared directory, typically on a synced drive
    #[arg(short, long)]
    pub remote: Option<PathBuf>,

    /// Delete local profiles that were deleted from the shared directory
    #[arg(long)]
    pub mirror: bool,

    /// Path to a JSON manager configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List profiles, optionally filtered by name
    List {
        #[arg(short, long)]
        query: Option<String>,
    },
    /// Create an empty profile
    Add {
        name: String,
        /// Also push it to the shared directory
        #[arg(long)]
        share: bool,
    },
    /// Import a profile from a JSON file
    Import {
        file: PathBuf,
        #[arg(long)]
        share: bool,
    },
    /// Copy a profile under a new unique name
    Duplicate { id: ProfileId },
    /// Delete profiles here and in the shared directory
    Remove {
        #[arg(required = true)]
        ids: Vec<ProfileId>,
    },
    /// Push a profile to the shared directory
    Share { id: ProfileId },
    /// Stop sharing a profile, keeping the local copy
    Unshare { id: ProfileId },
    /// Import from the shared directory and report the result
    Sync,
    /// Delete every profile from the shared directory
    EraseRemote,
}

/// Loads the manager configuration, applying command-line overrides.
pub async fn load_config(args: &Args) -> Result<ManagerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read config file {path:?}"))?;
            ManagerConfig::from_json(&bytes).context("Failed to parse config file")?
        }
        None => ManagerConfig::default(),
    };
    if args.mirror {
        config.mirrors_remote_repository = true;
    }
    Ok(config)
}

/// A started manager whose initial import has finished.
struct Session {
    manager: ProfileManager,
    local: Arc<FileProfileStore>,
    has_remote: bool,
}

impl Session {
    async fn open(args: &Args) -> Result<Self> {
        let config = load_config(args).await?;

        let local = Arc::new(
            FileProfileStore::open("local", args.local.clone())
                .await
                .with_context(|| format!("Failed to open local directory {:?}", args.local))?,
        );

        let notifier = ChangeNotifier::new(config.event_capacity);
        let mut events = notifier.subscribe();
        let mut builder = ProfileManager::builder(local.clone())
            .config(config)
            .notifier(notifier);

        let has_remote = args.remote.is_some();
        if let Some(dir) = &args.remote {
            let remote = FileProfileStore::open("remote", dir.clone())
                .await
                .with_context(|| format!("Failed to open shared directory {dir:?}"))?;
            builder = builder.remote(Arc::new(remote));
        }

        let manager = builder.start();
        manager.wait_until_ready().await?;
        if has_remote {
            wait_for_import(&mut events).await?;
        }

        let session = Self {
            manager,
            local,
            has_remote,
        };
        session.settle().await?;
        Ok(session)
    }

    /// Waits until the manager's state reflects the local directory.
    async fn settle(&self) -> Result<()> {
        let expected = self.local.fetch_all().await?;
        self.manager
            .wait_until(|state| state.all_profiles() == &expected)
            .await?;
        Ok(())
    }

    fn require_remote(&self) -> Result<()> {
        if !self.has_remote {
            bail!("This command needs --remote");
        }
        Ok(())
    }

    fn require_profile(&self, id: &ProfileId) -> Result<Profile> {
        self.manager
            .profile(id)
            .with_context(|| format!("No profile with id {id}"))
    }

    fn describe(&self, profile: &Profile) -> String {
        let shared = if self.manager.is_remotely_shared(&profile.id) {
            "  (shared)"
        } else {
            ""
        };
        format!("{}  {}{}", profile.id, profile.name, shared)
    }
}

async fn wait_for_import(events: &mut broadcast::Receiver<ProfileEvent>) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(ProfileEvent::RemoteImportStopped) => return Ok(()),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!("Skipped {} events", skipped),
            Err(RecvError::Closed) => bail!("Profile manager stopped during import"),
        }
    }
}

/// Runs `args.command` and returns the lines to print.
pub async fn execute(args: &Args) -> Result<Vec<String>> {
    let session = Session::open(args).await?;
    let result = run(&session, &args.command).await;
    session.manager.shutdown().await;
    result
}

async fn run(session: &Session, command: &Command) -> Result<Vec<String>> {
    let manager = &session.manager;
    match command {
        Command::List { query } => {
            if let Some(query) = query {
                manager.search(query.clone())?;
                manager
                    .wait_until(|state| state.view().query == *query)
                    .await?;
            }
            let view = manager.view();
            Ok(view.profiles.iter().map(|p| session.describe(p)).collect())
        }

        Command::Add { name, share } => {
            if *share {
                session.require_remote()?;
            }
            let profile = manager.new_profile(name);
            manager
                .save(profile.clone(), true, share.then_some(true))
                .await?;
            Ok(vec![format!("Added {} as {}", profile.name, profile.id)])
        }

        Command::Import { file, share } => {
            if *share {
                session.require_remote()?;
            }
            let bytes = tokio::fs::read(file)
                .await
                .with_context(|| format!("Failed to read {file:?}"))?;
            let profile = Profile::from_json(&bytes)
                .with_context(|| format!("{file:?} is not a valid profile"))?;
            let line = format!("Imported {} as {}", profile.name, profile.id);
            manager.save(profile, true, share.then_some(true)).await?;
            Ok(vec![line])
        }

        Command::Duplicate { id } => {
            let new_id = manager
                .duplicate(id)
                .await?
                .with_context(|| format!("No profile with id {id}"))?;
            session.settle().await?;
            let copy = session.require_profile(&new_id)?;
            Ok(vec![format!("Duplicated {} as {} ({})", id, copy.name, copy.id)])
        }

        Command::Remove { ids } => {
            for id in ids {
                session.require_profile(id)?;
            }
            manager.remove(ids).await?;
            Ok(ids.iter().map(|id| format!("Removed {id}")).collect())
        }

        Command::Share { id } => {
            session.require_remote()?;
            let profile = session.require_profile(id)?;
            manager.save(profile, true, Some(true)).await?;
            Ok(vec![format!("Shared {id}")])
        }

        Command::Unshare { id } => {
            session.require_remote()?;
            let profile = session.require_profile(id)?;
            manager.save(profile, true, Some(false)).await?;
            Ok(vec![format!("Unshared {id}")])
        }

        Command::Sync => {
            session.require_remote()?;
            let state = manager.state();
            let shared = state
                .all_profiles()
                .ids()
                .filter(|id| state.is_remotely_shared(id))
                .count();
            info!("Sync finished");
            Ok(vec![format!(
                "{} local profiles, {} shared",
                state.all_profiles().len(),
                shared
            )])
        }

        Command::EraseRemote => {
            session.require_remote()?;
            manager.erase_remotely_shared().await?;
            Ok(vec!["Erased shared profiles".to_string()])
        }
    }
}
