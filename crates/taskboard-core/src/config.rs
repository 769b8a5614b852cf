use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace
};

pub const DEFAULT_POLL_SECONDS: u64 =
  60;

const RC_ENV_VAR: &str = "TASKBOARDRC";
const RC_FILE_NAME: &str =
  ".taskboardrc";

const DEFAULTS: [(&str, &str); 5] = [
  ("data.location", "~/.taskboard"),
  ("color", "on"),
  ("hooks", "on"),
  ("default.view", "active"),
  ("repeat.poll_seconds", "60")
];

/// Flat `key = value` settings: built-in
/// defaults, then the boardrc file, then
/// command-line overrides.
#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>
}

impl Config {
  pub fn defaults() -> Self {
    Self {
      map: DEFAULTS
        .iter()
        .map(|(key, value)| {
          (
            (*key).to_string(),
            (*value).to_string()
          )
        })
        .collect()
    }
  }

  /// Defaults plus the boardrc found via
  /// `--boardrc`, `$TASKBOARDRC` or
  /// `~/.taskboardrc`.
  #[tracing::instrument]
  pub fn load(
    boardrc: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    let Some(path) = locate_boardrc(
      boardrc
    ) else {
      debug!("no boardrc; defaults only");
      return Ok(cfg);
    };

    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "failed to read boardrc {}",
          path.display()
        )
      })?;
    for entry in parse_rc(&text) {
      let (key, value) = entry
        .with_context(|| {
          format!(
            "invalid boardrc {}",
            path.display()
          )
        })?;
      trace!(%key, %value, "boardrc setting");
      cfg.map.insert(key, value);
    }

    info!(boardrc = %path.display(), keys = cfg.map.len(), "loaded boardrc");
    Ok(cfg)
  }

  /// `rc.` prefixes are optional.
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (key, value) in overrides {
      let key = match key
        .strip_prefix("rc.")
      {
        | Some(rest) => rest.to_string(),
        | None => key
      };
      debug!(%key, %value, "config override");
      self.map.insert(key, value);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| is_truthy(v))
  }

  pub fn get_u64(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u64>> {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(None);
    };
    raw
      .trim()
      .parse::<u64>()
      .map(Some)
      .with_context(|| {
        format!(
          "{key} must be a whole \
           number, got {raw:?}"
        )
      })
  }

  /// Seconds between repeat checks in
  /// `watch`, never zero.
  pub fn poll_seconds(
    &self
  ) -> anyhow::Result<u64> {
    let seconds = self
      .get_u64("repeat.poll_seconds")?
      .unwrap_or(DEFAULT_POLL_SECONDS);
    Ok(seconds.max(1))
  }
}

/// One `(key, value)` per setting line.
/// `#` starts a comment anywhere on a
/// line.
fn parse_rc(
  text: &str
) -> impl Iterator<
  Item = anyhow::Result<(
    String,
    String
  )>
> + '_ {
  text.lines().enumerate().filter_map(
    |(idx, raw)| {
      let line = raw
        .split_once('#')
        .map_or(raw, |(before, _)| {
          before
        })
        .trim();
      if line.is_empty() {
        return None;
      }

      Some(match line.split_once('=') {
        | Some((key, value))
          if !key.trim().is_empty() =>
        {
          Ok((
            key.trim().to_string(),
            value.trim().to_string()
          ))
        }
        | _ => {
          Err(anyhow!(
            "line {}: expected \
             `key = value`, got \
             {raw:?}",
            idx + 1
          ))
        }
      })
    }
  )
}

fn locate_boardrc(
  explicit: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = explicit {
    return Some(path.to_path_buf());
  }

  match std::env::var(RC_ENV_VAR) {
    | Ok(value)
      if value.is_empty()
        || value == "/dev/null" =>
    {
      return None;
    }
    | Ok(value) => {
      return Some(PathBuf::from(value));
    }
    | Err(_) => {}
  }

  dirs::home_dir()
    .map(|home| home.join(RC_FILE_NAME))
    .filter(|path| path.is_file())
}

/// `--data`, else `data.location`. The
/// directory is created when missing.
#[tracing::instrument(skip(cfg))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match override_dir {
    | Some(path) => path.to_path_buf(),
    | None => {
      let location = cfg
        .get("data.location")
        .unwrap_or_else(|| {
          "~/.taskboard".to_string()
        });
      expand_home(&location)?
    }
  };

  fs::create_dir_all(&dir)
    .with_context(|| {
      format!(
        "failed to create data \
         directory {}",
        dir.display()
      )
    })?;
  debug!(dir = %dir.display(), "data directory ready");
  Ok(dir)
}

fn expand_home(
  raw: &str
) -> anyhow::Result<PathBuf> {
  let Some(rest) = raw.strip_prefix("~/")
  else {
    return Ok(PathBuf::from(raw));
  };
  dirs::home_dir()
    .map(|home| home.join(rest))
    .ok_or_else(|| {
      anyhow!(
        "cannot expand {raw}: no home \
         directory"
      )
    })
}

fn is_truthy(raw: &str) -> bool {
  matches!(
    raw
      .trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
