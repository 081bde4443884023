/// Expects to be called like this:
/// env \
///   PRINFO_OWNER=cBioPortal \
///   PRINFO_REPO=cbioportal-frontend \
///   RUST_LOG=trace \
///   cargo run --example fetch_pullrequest 4521
use pullrequestinfo::{business, settings::Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    let number = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: fetch_pullrequest <PULL_REQUEST>"))?;

    let client = business::GithubClient::new(&Settings::from_env()?)?;
    let info = business::fetch_pullrequest_info(&client, &number).await?;

    log::debug!("{info:#?}");

    Ok(())
}
