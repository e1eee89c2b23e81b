use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

pub const DEFAULT_USER_AGENT: &str = "booksync/0.1";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONFIG_FILENAME: &str = "booksync.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(default)]
    pub bookstack: BookStackSection,
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BookStackSection {
    pub url: Option<String>,
    pub token_id: Option<String>,
    pub token_secret: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncSection {
    pub book_id: Option<u64>,
    pub chapter_id: Option<u64>,
    pub path: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Load a `FileConfig` from TOML. A missing file yields the default unless
/// `required` is set.
pub fn load_config(config_path: &Path, required: bool) -> Result<FileConfig> {
    if !config_path.exists() {
        if required {
            return Err(SyncError::configuration(format!(
                "config file not found: {}",
                config_path.display()
            )));
        }
        return Ok(FileConfig::default());
    }
    let content = fs::read_to_string(config_path).map_err(|error| {
        SyncError::configuration(format!(
            "failed to read {}: {error}",
            config_path.display()
        ))
    })?;
    toml::from_str(&content).map_err(|error| {
        SyncError::configuration(format!(
            "failed to parse {}: {error}",
            config_path.display()
        ))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    ActionInput,
    File,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::ActionInput => "action-input",
            Self::File => "file",
            Self::Default => "default",
        }
    }
}

/// Raw values as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigInputs {
    pub url: Option<String>,
    pub token_id: Option<String>,
    pub token_secret: Option<String>,
    pub book_id: Option<String>,
    pub chapter_id: Option<String>,
    pub path: Option<String>,
    pub tags: Option<String>,
    pub timeout_ms: Option<String>,
}

struct Setting {
    input: &'static str,
    env: &'static str,
}

const URL: Setting = Setting {
    input: "url",
    env: "BOOKSTACK_URL",
};
const TOKEN_ID: Setting = Setting {
    input: "token-id",
    env: "BOOKSTACK_TOKEN_ID",
};
const TOKEN_SECRET: Setting = Setting {
    input: "token-secret",
    env: "BOOKSTACK_TOKEN_SECRET",
};
const BOOK_ID: Setting = Setting {
    input: "book-id",
    env: "BOOKSTACK_BOOK_ID",
};
const CHAPTER_ID: Setting = Setting {
    input: "chapter-id",
    env: "BOOKSTACK_CHAPTER_ID",
};
const PATH: Setting = Setting {
    input: "path",
    env: "BOOKSTACK_PATH",
};
const TAGS: Setting = Setting {
    input: "tags",
    env: "BOOKSTACK_TAGS",
};
const TIMEOUT_MS: Setting = Setting {
    input: "timeout-ms",
    env: "BOOKSTACK_TIMEOUT_MS",
};
const USER_AGENT: Setting = Setting {
    input: "user-agent",
    env: "BOOKSTACK_USER_AGENT",
};

/// GitHub Actions exposes `with:` inputs as `INPUT_<NAME>` with hyphens kept.
pub fn action_input_key(input: &str) -> String {
    format!("INPUT_{}", input.replace(' ', "_").to_uppercase())
}

#[derive(Clone)]
pub struct Credentials {
    pub url: String,
    pub token_id: String,
    pub token_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("token_id", &self.token_id)
            .field("token_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Chapter(u64),
    Book(u64),
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chapter(id) => write!(f, "chapter {id}"),
            Self::Book(id) => write!(f, "book {id}"),
        }
    }
}

/// Where pages are listed and which ids get attached to written pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertTarget {
    pub book_id: Option<u64>,
    pub chapter_id: Option<u64>,
}

impl UpsertTarget {
    /// The container used for the inventory. A chapter wins over a book.
    pub fn container(&self) -> Option<Container> {
        match (self.chapter_id, self.book_id) {
            (Some(chapter_id), _) => Some(Container::Chapter(chapter_id)),
            (None, Some(book_id)) => Some(Container::Book(book_id)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub credentials: Credentials,
    pub target: UpsertTarget,
    pub path: String,
    pub tags: Vec<String>,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub sources: BTreeMap<&'static str, ValueSource>,
}

impl SyncConfig {
    pub fn diagnostics(&self) -> String {
        let mut lines = vec![
            format!("url={}", self.credentials.url),
            format!("token_id={}", self.credentials.token_id),
            "token_secret=<redacted>".to_string(),
            format!(
                "book_id={}",
                self.target
                    .book_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "<none>".to_string())
            ),
            format!(
                "chapter_id={}",
                self.target
                    .chapter_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "<none>".to_string())
            ),
            format!("path={}", self.path),
            format!("tags={}", self.tags.join(",")),
            format!("user_agent={}", self.user_agent),
            format!("timeout_ms={}", self.timeout_ms),
        ];
        for (input, source) in &self.sources {
            lines.push(format!("source.{input}={}", source.as_str()));
        }
        lines.join("\n")
    }
}

struct Resolver<E> {
    env: E,
    sources: BTreeMap<&'static str, ValueSource>,
}

impl<E> Resolver<E>
where
    E: Fn(&str) -> Option<String>,
{
    fn new(env: E) -> Self {
        Self {
            env,
            sources: BTreeMap::new(),
        }
    }

    /// flag > env > action input > file. Blank values count as unset.
    fn lookup(
        &mut self,
        setting: &Setting,
        flag: Option<&str>,
        file: Option<String>,
    ) -> Option<String> {
        let candidates = [
            (flag.map(ToString::to_string), ValueSource::Flag),
            ((self.env)(setting.env), ValueSource::Env),
            (
                (self.env)(&action_input_key(setting.input)),
                ValueSource::ActionInput,
            ),
            (file, ValueSource::File),
        ];
        for (value, source) in candidates {
            let Some(value) = value else {
                continue;
            };
            let trimmed = value.trim();
            if trimmed.is_empty() {
                continue;
            }
            self.sources.insert(setting.input, source);
            return Some(trimmed.to_string());
        }
        None
    }

    fn required(
        &mut self,
        setting: &Setting,
        flag: Option<&str>,
        file: Option<String>,
    ) -> Result<String> {
        self.lookup(setting, flag, file)
            .ok_or_else(|| SyncError::missing_input(setting.input))
    }

    fn id(
        &mut self,
        setting: &Setting,
        flag: Option<&str>,
        file: Option<u64>,
    ) -> Result<Option<u64>> {
        self.lookup(setting, flag, file.map(|id| id.to_string()))
            .map(|value| parse_id(setting.input, &value))
            .transpose()
    }
}

/// Resolve the full run configuration. Inputs are validated in the order
/// credentials, target, path so the first missing one is reported.
pub fn resolve_config<E>(inputs: &ConfigInputs, file: &FileConfig, env: E) -> Result<SyncConfig>
where
    E: Fn(&str) -> Option<String>,
{
    let mut resolver = Resolver::new(env);

    let url = resolver.required(&URL, inputs.url.as_deref(), file.bookstack.url.clone())?;
    let token_id = resolver.required(
        &TOKEN_ID,
        inputs.token_id.as_deref(),
        file.bookstack.token_id.clone(),
    )?;
    let token_secret = resolver.required(
        &TOKEN_SECRET,
        inputs.token_secret.as_deref(),
        file.bookstack.token_secret.clone(),
    )?;

    let book_id = resolver.id(&BOOK_ID, inputs.book_id.as_deref(), file.sync.book_id)?;
    let chapter_id = resolver.id(
        &CHAPTER_ID,
        inputs.chapter_id.as_deref(),
        file.sync.chapter_id,
    )?;
    if book_id.is_none() && chapter_id.is_none() {
        return Err(SyncError::configuration(
            "missing input: book-id or chapter-id (at least one needs to be set)",
        ));
    }

    let path = resolver.required(&PATH, inputs.path.as_deref(), file.sync.path.clone())?;

    let file_tags = (!file.sync.tags.is_empty()).then(|| file.sync.tags.join(","));
    let tags = resolver
        .lookup(&TAGS, inputs.tags.as_deref(), file_tags)
        .map(|raw| parse_tags(&raw))
        .unwrap_or_default();

    let timeout_ms = match resolver.lookup(
        &TIMEOUT_MS,
        inputs.timeout_ms.as_deref(),
        file.bookstack.timeout_ms.map(|value| value.to_string()),
    ) {
        Some(raw) => raw.parse::<u64>().map_err(|_| {
            SyncError::configuration(format!(
                "invalid input: timeout-ms must be a number, got {raw:?}"
            ))
        })?,
        None => {
            resolver.sources.insert(TIMEOUT_MS.input, ValueSource::Default);
            DEFAULT_TIMEOUT_MS
        }
    };

    let user_agent = match resolver.lookup(&USER_AGENT, None, file.bookstack.user_agent.clone()) {
        Some(value) => value,
        None => {
            resolver.sources.insert(USER_AGENT.input, ValueSource::Default);
            DEFAULT_USER_AGENT.to_string()
        }
    };

    Ok(SyncConfig {
        credentials: Credentials {
            url,
            token_id,
            token_secret,
        },
        target: UpsertTarget {
            book_id,
            chapter_id,
        },
        path,
        tags,
        user_agent,
        timeout_ms,
        sources: resolver.sources,
    })
}

/// Resolve against the process environment and an optional config file.
/// Without an explicit path, `booksync.toml` in the working directory is used
/// when present.
pub fn resolve_from_process(
    inputs: &ConfigInputs,
    config_path: Option<&Path>,
) -> Result<SyncConfig> {
    let file = match config_path {
        Some(path) => load_config(path, true)?,
        None => load_config(Path::new(DEFAULT_CONFIG_FILENAME), false)?,
    };
    resolve_config(inputs, &file, |key| env::var(key).ok())
}

pub fn parse_id(input: &str, value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(SyncError::configuration(format!(
            "invalid input: {input} must be a positive integer, got {value:?}"
        ))),
    }
}

/// `"api, guides,,ops "` -> `["api", "guides", "ops"]`
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect()
}
