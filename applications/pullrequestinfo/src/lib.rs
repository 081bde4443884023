pub mod util {
    use log::debug;

    /// Returns the capture groups of the first match of `re` in `haystack`.
    /// Index 0 is the whole match, unmatched optional groups are empty strings.
    pub fn first_captures(re: &str, haystack: &str) -> Result<Option<Vec<String>>, pcre2::Error> {
        // utf + ucp: `\s` matches unicode White_Space (e.g. U+0085, U+00A0), but not the
        // U+001C..U+001F separators
        let compiled_re = pcre2::bytes::RegexBuilder::new()
            .utf(true)
            .ucp(true)
            .build(re)?;

        let maybe_captures = compiled_re.captures(haystack.as_bytes())?.map(|captures| {
            (0..captures.len())
                .map(|i| {
                    captures
                        .get(i)
                        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>()
        });

        debug!("'{re}' captured {maybe_captures:?}");

        Ok(maybe_captures)
    }

    /// The part of a `<org>/<repo>` name before the first '/', lower-cased.
    pub fn organization_from_full_name(full_name: &str) -> String {
        full_name
            .split_once('/')
            .map_or(full_name, |(org, _)| org)
            .to_lowercase()
    }

    #[cfg(test)]
    mod tests {
        use test_log::test;

        use super::{first_captures, organization_from_full_name};

        #[test]
        fn organization_is_lowercased_prefix() {
            assert_eq!(organization_from_full_name("ACME/repo"), "acme");
            assert_eq!(organization_from_full_name("Foo/bar/baz"), "foo");
            assert_eq!(organization_from_full_name("NoSlash"), "noslash");
        }

        #[test]
        fn first_captures_only_reports_first_match() {
            let captures = first_captures(r"(\d+)-(\d+)", "a 1-2 b 3-4").unwrap();
            assert_eq!(
                captures,
                Some(vec!["1-2".to_string(), "1".to_string(), "2".to_string()])
            );
        }

        #[test]
        fn first_captures_without_match() {
            assert_eq!(first_captures(r"x(\d)", "nothing here").unwrap(), None);
        }

        #[test]
        fn whitespace_class_is_unicode_white_space() {
            let capture = |haystack: &str| {
                first_captures(r"=(\S+)", haystack).unwrap().unwrap()[1].clone()
            };

            assert_eq!(capture("=feat\u{85}rest"), "feat");
            assert_eq!(capture("=feat\u{a0}rest"), "feat");
            assert_eq!(capture("=feat\u{1c}rest"), "feat\u{1c}rest");
        }

        #[test]
        fn invalid_pattern_is_an_error() {
            assert!(first_captures(r"(unclosed", "whatever").is_err());
        }
    }
}

pub mod settings {
    use std::{collections::HashMap, path::Path};

    use anyhow::{bail, Context, Result};
    use log::debug;
    use serde::Deserialize;

    pub const ENV_PREFIX: &str = "PRINFO";
    /// Names an optional TOML/JSON/JSON5 file layered between the defaults and the environment
    pub const CONFIG_FILE_ENV_KEY: &str = "PRINFO_CONFIG_FILE";

    pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
    pub const DEFAULT_OWNER: &str = "cBioPortal";
    pub const DEFAULT_REPO: &str = "cbioportal-frontend";

    /// Where to look up pull requests.
    #[derive(Debug, Clone, Deserialize)]
    pub struct Settings {
        pub api_base_url: String,
        pub owner: String,
        pub repo: String,
        /// no timeout is applied when unset
        pub timeout_secs: Option<u64>,
    }

    impl Settings {
        /// Loads defaults, then the file named by `PRINFO_CONFIG_FILE`, then `PRINFO_*` variables.
        pub fn from_env() -> Result<Self> {
            let config_file = std::env::var_os(CONFIG_FILE_ENV_KEY);

            Self::load(config_file.as_deref().map(Path::new), None)
        }

        /// `env_override` replaces the process environment as the source of `PRINFO_*` variables.
        pub fn load(
            config_file: Option<&Path>,
            env_override: Option<HashMap<String, String>>,
        ) -> Result<Self> {
            let mut builder = config::Config::builder()
                .set_default("api_base_url", DEFAULT_API_BASE_URL)?
                .set_default("owner", DEFAULT_OWNER)?
                .set_default("repo", DEFAULT_REPO)?;

            if let Some(path) = config_file {
                debug!("reading settings from {path:?}");
                builder = builder.add_source(config::File::from(path).required(true));
            }

            let settings: Self = builder
                .add_source(
                    config::Environment::with_prefix(ENV_PREFIX).source(env_override),
                )
                .build()
                .context("assembling settings")?
                .try_deserialize()
                .context("deserializing settings")?;

            settings.validate()?;
            debug!("settings: {settings:#?}");

            Ok(settings)
        }

        fn validate(&self) -> Result<()> {
            for (name, value) in [
                ("api_base_url", &self.api_base_url),
                ("owner", &self.owner),
                ("repo", &self.repo),
            ] {
                if value.trim().is_empty() {
                    bail!("setting '{name}' must not be empty");
                }
            }

            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use test_log::test;

        use std::{collections::HashMap, io::Write};

        use tempfile::NamedTempFile;

        use super::{Settings, DEFAULT_API_BASE_URL, DEFAULT_OWNER, DEFAULT_REPO};

        fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
            Some(HashMap::from_iter(
                pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())),
            ))
        }

        #[test]
        fn defaults_point_at_the_frontend_repository() {
            let settings = Settings::load(None, env(&[])).unwrap();

            assert_eq!(settings.api_base_url, DEFAULT_API_BASE_URL);
            assert_eq!(settings.owner, DEFAULT_OWNER);
            assert_eq!(settings.repo, DEFAULT_REPO);
            assert_eq!(settings.timeout_secs, None);
        }

        #[test]
        fn environment_overrides_file_overrides_defaults() {
            let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
            file.write_all(b"owner = \"from-file\"\nrepo = \"file-repo\"\ntimeout_secs = 5\n")
                .unwrap();

            let settings = Settings::load(
                Some(file.path()),
                env(&[
                    ("PRINFO_REPO", "env-repo"),
                    ("PRINFO_API_BASE_URL", "http://localhost:1234"),
                ]),
            )
            .unwrap();

            assert_eq!(settings.api_base_url, "http://localhost:1234");
            assert_eq!(settings.owner, "from-file");
            assert_eq!(settings.repo, "env-repo");
            assert_eq!(settings.timeout_secs, Some(5));
        }

        #[test]
        fn timeout_from_environment_is_parsed() {
            let settings = Settings::load(None, env(&[("PRINFO_TIMEOUT_SECS", "30")])).unwrap();
            assert_eq!(settings.timeout_secs, Some(30));
        }

        #[test]
        fn missing_config_file_is_an_error() {
            let file = NamedTempFile::new().unwrap();
            let path = file.path().with_extension("toml");
            drop(file);

            assert!(Settings::load(Some(&path), env(&[])).is_err());
        }

        #[test]
        fn empty_owner_is_rejected() {
            let err = Settings::load(None, env(&[("PRINFO_OWNER", " ")])).unwrap_err();
            assert!(err.to_string().contains("owner"), "{err:#}");
        }

        #[test]
        fn numeric_looking_names_stay_verbatim() {
            let settings = Settings::load(
                None,
                env(&[("PRINFO_OWNER", "007"), ("PRINFO_REPO", "1e3")]),
            )
            .unwrap();

            assert_eq!(settings.owner, "007");
            assert_eq!(settings.repo, "1e3");
        }
    }
}

pub mod business {
    use log::{debug, info, trace};
    use reqwest::StatusCode;
    use serde::Deserialize;
    use std::time;

    use super::settings::Settings;
    use super::util::{first_captures, organization_from_full_name};

    const BACKEND_BRANCH_RE: &str = r"BACKEND_BRANCH=([^\s]+):([^\s]+)";

    #[derive(Debug, thiserror::Error)]
    pub enum PullRequestInfoError {
        #[error("building the HTTP client")]
        ClientSetup(#[source] reqwest::Error),

        #[error("querying {url}")]
        Transport {
            url: String,
            #[source]
            source: reqwest::Error,
        },

        #[error("{url} responded with {} {reason}", .status.as_u16())]
        HttpStatus {
            url: String,
            status: StatusCode,
            reason: String,
        },

        #[error("parsing the response for pull request {number} as JSON")]
        Parse {
            number: String,
            #[source]
            source: serde_json::Error,
        },

        #[error("looking up the expected fields of pull request {number}")]
        KeyLookup {
            number: String,
            #[source]
            source: serde_json::Error,
        },

        #[error("pull request has no description to scan for BACKEND_BRANCH=")]
        PatternScan,

        #[error("matching '{pattern}'")]
        Pattern {
            pattern: &'static str,
            #[source]
            source: pcre2::Error,
        },
    }

    pub type Result<T> = std::result::Result<T, PullRequestInfoError>;

    /// The subset of the pulls API response this tool reads.
    #[derive(Debug, Deserialize)]
    pub struct PullRequest {
        pub head: PullRequestRef,
        pub base: PullRequestRef,
        /// `null` when the pull request has no description
        pub body: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct PullRequestRef {
        #[serde(rename = "ref")]
        pub ref_name: String,
        pub sha: String,
        pub repo: Repository,
    }

    #[derive(Debug, Deserialize)]
    pub struct Repository {
        pub full_name: String,
        pub name: String,
    }

    /// Parsed from `BACKEND_BRANCH=<org>:<branch>` in the pull request description.
    #[derive(Debug, PartialEq, Eq)]
    pub struct BackendBranch {
        pub organization: String,
        pub branch_name: String,
    }

    /// Everything that ends up in the exported environment.
    #[derive(Debug, PartialEq, Eq)]
    pub struct PullRequestInfo {
        pub frontend_branch_name: String,
        pub frontend_commit_hash: String,
        pub frontend_organization: String,
        pub frontend_repo_name: String,
        pub frontend_base_branch_name: String,
        pub frontend_base_commit_hash: String,
        pub frontend_base_organization: String,
        pub frontend_base_repo_name: String,
        pub backend_organization: String,
        pub backend_branch_name: String,
    }

    impl PullRequestInfo {
        pub fn from_pullrequest(pullrequest: PullRequest) -> Result<Self> {
            let backend = scan_backend_branch(pullrequest.body.as_deref())?;
            let PullRequest { head, base, .. } = pullrequest;

            let (backend_organization, backend_branch_name) = match backend {
                Some(BackendBranch {
                    organization,
                    branch_name,
                }) => (organization, branch_name),
                None => Default::default(),
            };

            Ok(Self {
                frontend_organization: organization_from_full_name(&head.repo.full_name),
                frontend_branch_name: head.ref_name,
                frontend_commit_hash: head.sha,
                frontend_repo_name: head.repo.name,
                frontend_base_organization: organization_from_full_name(&base.repo.full_name),
                frontend_base_branch_name: base.ref_name,
                frontend_base_commit_hash: base.sha,
                frontend_base_repo_name: base.repo.name,
                backend_organization,
                backend_branch_name,
            })
        }

        /// Variable names and values in output order.
        pub fn exports(&self) -> [(&'static str, &str); 10] {
            [
                ("FRONTEND_BRANCH_NAME", self.frontend_branch_name.as_str()),
                ("FRONTEND_COMMIT_HASH", self.frontend_commit_hash.as_str()),
                ("FRONTEND_ORGANIZATION", self.frontend_organization.as_str()),
                ("FRONTEND_REPO_NAME", self.frontend_repo_name.as_str()),
                ("FRONTEND_BASE_BRANCH_NAME", self.frontend_base_branch_name.as_str()),
                ("FRONTEND_BASE_COMMIT_HASH", self.frontend_base_commit_hash.as_str()),
                ("FRONTEND_BASE_ORGANIZATION", self.frontend_base_organization.as_str()),
                ("FRONTEND_BASE_REPO_NAME", self.frontend_base_repo_name.as_str()),
                ("BACKEND_ORGANIZATION", self.backend_organization.as_str()),
                ("BACKEND_BRANCH_NAME", self.backend_branch_name.as_str()),
            ]
        }

        /// One `export KEY=value` line per variable, without a trailing newline.
        pub fn to_export_lines(&self) -> String {
            self.exports()
                .iter()
                .map(|(key, value)| format!("export {key}={value}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
    }

    /// Finds the first backend branch directive. A missing description is an error, not an empty match.
    pub fn scan_backend_branch(body: Option<&str>) -> Result<Option<BackendBranch>> {
        let body = body.ok_or(PullRequestInfoError::PatternScan)?;

        let maybe_captures = first_captures(BACKEND_BRANCH_RE, body).map_err(|source| {
            PullRequestInfoError::Pattern {
                pattern: BACKEND_BRANCH_RE,
                source,
            }
        })?;

        Ok(maybe_captures.map(|captures| BackendBranch {
            organization: captures
                .get(1)
                .map(|org| org.to_lowercase())
                .unwrap_or_default(),
            branch_name: captures.get(2).cloned().unwrap_or_default(),
        }))
    }

    /// Two steps: syntactically valid JSON first, then the expected shape.
    pub fn parse_pullrequest(number: &str, raw: &str) -> Result<PullRequest> {
        let level0value: serde_json::Value =
            serde_json::from_str(raw).map_err(|source| PullRequestInfoError::Parse {
                number: number.to_string(),
                source,
            })?;

        serde_json::from_value(level0value).map_err(|source| PullRequestInfoError::KeyLookup {
            number: number.to_string(),
            source,
        })
    }

    /// Source of raw pull request documents.
    #[allow(async_fn_in_trait)]
    pub trait PullRequestFetcher {
        async fn fetch(&self, number: &str) -> Result<String>;
    }

    pub struct GithubClient {
        client: reqwest::Client,
        base_url: String,
        owner: String,
        repo: String,
    }

    impl GithubClient {
        pub fn new(settings: &Settings) -> Result<Self> {
            let mut builder = reqwest::Client::builder().user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ));
            if let Some(secs) = settings.timeout_secs {
                builder = builder.timeout(time::Duration::from_secs(secs));
            }

            Ok(Self {
                client: builder.build().map_err(PullRequestInfoError::ClientSetup)?,
                base_url: settings.api_base_url.trim_end_matches('/').to_string(),
                owner: settings.owner.clone(),
                repo: settings.repo.clone(),
            })
        }

        pub fn pullrequest_url(&self, number: &str) -> String {
            format!(
                "{}/repos/{}/{}/pulls/{number}",
                self.base_url, self.owner, self.repo
            )
        }
    }

    impl PullRequestFetcher for GithubClient {
        async fn fetch(&self, number: &str) -> Result<String> {
            let url = self.pullrequest_url(number);
            let req = self.client.get(&url);

            debug!("{url} request: {req:#?}");

            let response = req
                .send()
                .await
                .map_err(|source| PullRequestInfoError::Transport {
                    url: url.clone(),
                    source,
                })?;

            let status = response.status();
            debug!("{url} responded with {status}");
            if !status.is_success() {
                return Err(PullRequestInfoError::HttpStatus {
                    reason: status
                        .canonical_reason()
                        .unwrap_or("<unknown status code>")
                        .to_string(),
                    url,
                    status,
                });
            }

            let text = response
                .text()
                .await
                .map_err(|source| PullRequestInfoError::Transport {
                    url: url.clone(),
                    source,
                })?;
            trace!("{url} response: {text}");

            Ok(text)
        }
    }

    /// Fetches pull request `number` and extracts the values to export.
    pub async fn fetch_pullrequest_info<F: PullRequestFetcher>(
        fetcher: &F,
        number: &str,
    ) -> Result<PullRequestInfo> {
        let raw = fetcher.fetch(number).await?;
        let pullrequest = parse_pullrequest(number, &raw)?;
        let info = PullRequestInfo::from_pullrequest(pullrequest)?;

        info!(
            "pull request {number}: {}:{} -> {}:{}",
            info.frontend_organization,
            info.frontend_branch_name,
            info.frontend_base_organization,
            info.frontend_base_branch_name
        );

        Ok(info)
    }

}
