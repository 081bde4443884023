//! Prints `export` statements describing a cbioportal-frontend pull request, meant to be `eval`-ed
//! by the shell that sets up the end-to-end test build.
//!
//! Only the export lines go to stdout; logs and errors go to stderr.

use anyhow::Context;
use clap::Parser;

use pullrequestinfo::{
    business::{self, GithubClient},
    settings::Settings,
};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Pull request number, passed to the API as given
    pull_request: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = Settings::from_env().context("loading settings")?;
    let client = GithubClient::new(&settings)?;

    let info = business::fetch_pullrequest_info(&client, &args.pull_request)
        .await
        .context(format!(
            "collecting info for pull request {}",
            args.pull_request
        ))?;

    println!("{}", info.to_export_lines());

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Args;

    #[test]
    fn pull_request_argument_is_required() {
        assert!(Args::try_parse_from(["pullrequestinfo"]).is_err());
    }

    #[test]
    fn pull_request_argument_is_not_validated() {
        let args = Args::try_parse_from(["pullrequestinfo", "not-a-number"]).unwrap();
        assert_eq!(args.pull_request, "not-a-number");
    }
}
