use anistream::backend::{AnimeId, BackendClient, EpisodeNumber};
use anistream::cache::{KvStorage, MemoryStorage, SqliteStorage};
use anistream::config::Config;
use anistream::episodes::{EpisodeCacheService, SelectedFilters};
use anistream::logging;
use anistream::reconcile::Bootstrap;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "anistream")]
#[command(about = "Episode and playback state cache for an anime streaming client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/anistream/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch remote metadata, rebuild local state and look for a resumable episode
  Bootstrap,
  /// Availability and next airing date for an episode
  Episodes {
    anime_id: AnimeId,
    #[arg(default_value_t = 1)]
    episode: EpisodeNumber,
    /// Only answer from fresh cached data
    #[arg(long)]
    local: bool,
  },
  /// Refresh the available episode list of one or more anime
  Refresh {
    #[arg(required = true)]
    anime_ids: Vec<AnimeId>,
    /// Maximum concurrent requests
    #[arg(short = 'j', long, default_value_t = 4)]
    jobs: usize,
  },
  /// Show the episode that would be offered for resume, or one anime's pointer
  Resume { anime_id: Option<AnimeId> },
  /// Decline resuming an anime, forgetting its last-watched pointer
  Decline { anime_id: AnimeId },
  /// Show the saved filters, or replace them when any are given
  Filters {
    #[arg(long = "watch")]
    watch: Vec<String>,
    #[arg(long = "airing")]
    airing: Vec<String>,
  },
  /// Drop cached availability and airing data
  Clear {
    anime_id: AnimeId,
    /// Only this episode's airing entry (default: all of them)
    episode: Option<EpisodeNumber>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init(&config.log, &config.log_dir()?)?;

  let storage: Arc<dyn KvStorage> = if config.storage.in_memory {
    Arc::new(MemoryStorage::new())
  } else if let Some(path) = &config.storage.path {
    Arc::new(SqliteStorage::open(path)?)
  } else {
    Arc::new(SqliteStorage::open_default()?)
  };
  let backend = Arc::new(BackendClient::new(&config.backend)?);
  let service =
    EpisodeCacheService::new(storage, backend).with_session_mirror(config.playback.mirror_to_server);

  match args.command {
    Command::Bootstrap => {
      let deadline = Duration::from_secs(config.backend.timeout_secs);
      let (state, _) = Bootstrap::new(service).with_deadline(deadline).run().await?;
      println!("lineages: {}", state.lineages.len());
      println!("animes:   {}", state.animes.len());
      println!(
        "visible:  {}",
        state.visible.iter().map(|(_, ids)| ids.len()).sum::<usize>()
      );
      for (anime_id, episodes) in &state.episodes {
        let title = state
          .animes
          .get(anime_id)
          .map(|a| a.display_title())
          .unwrap_or_else(|| anime_id.to_string());
        for (episode, countdown) in &episodes.countdowns {
          println!("airing:   {} episode {}: {}", title, episode, countdown.label());
        }
      }
      for notice in &state.notices {
        println!("notice:   {:?}: {}", notice.source, notice.message);
      }
      match state.resumable {
        Some(c) => println!("resume:   {} episode {} ({})", c.anime_id, c.episode, c.watched_at),
        None => println!("resume:   nothing to resume"),
      }
    }
    Command::Episodes {
      anime_id,
      episode,
      local,
    } => match service.check_episodes(anime_id, episode, local).await? {
      Some(data) => {
        println!("{}", serde_json::to_string_pretty(&data)?);
      }
      None => println!("no fresh local data for {} episode {}", anime_id, episode),
    },
    Command::Refresh { anime_ids, jobs } => {
      for (anime_id, result) in service.refresh_availability_many(&anime_ids, jobs).await {
        match result {
          Ok(episodes) => println!("{}: {:?}", anime_id, episodes),
          Err(e) => println!("{}: failed: {}", anime_id, e),
        }
      }
    }
    Command::Resume {
      anime_id: Some(anime_id),
    } => match service.last_watched_pointer(anime_id).await? {
      Some(p) => println!("{} episode {} (at {})", anime_id, p.episode_number, p.timestamp),
      None => println!("no last watched episode for {}", anime_id),
    },
    Command::Resume { anime_id: None } => {
      if let Err(e) = service.import_session_pointers().await {
        tracing::warn!(error = %e, "could not read last watched pointers from the session");
      }
      match service.resolve_resumable() {
        Some(c) => println!("{} episode {} ({})", c.anime_id, c.episode, c.watched_at),
        None => println!("nothing to resume"),
      }
    }
    Command::Decline { anime_id } => {
      service.decline_resume(anime_id).await?;
      println!("cleared resume pointer for {}", anime_id);
    }
    Command::Filters { watch, airing } => {
      if watch.is_empty() && airing.is_empty() {
        match service.filters() {
          Some(filters) => println!("{}", serde_json::to_string_pretty(&filters)?),
          None => println!("no filters saved"),
        }
      } else {
        let filters = SelectedFilters {
          watch_statuses: watch,
          airing_statuses: airing,
        };
        service.save_filters(&filters)?;
        println!("{}", serde_json::to_string_pretty(&filters)?);
      }
    }
    Command::Clear { anime_id, episode } => {
      match episode {
        Some(episode) => service.clear_cached_episode_data(anime_id, episode)?,
        None => service.clear_cached_anime_data(anime_id)?,
      }
      println!("cleared cached episode data for {}", anime_id);
    }
  }

  Ok(())
}
