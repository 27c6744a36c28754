//! submit one observation to a running gateway, like any other HTTP client would

use anyhow::Result;
use relay::Observation;

use crate::{core::args::PublishArgs, gateway::PublishResponse};

pub async fn main(args: PublishArgs) -> Result<()> {
    let res = send(&args.url, Observation::new(args.description, args.country, args.weather)).await?;
    println!("{}", serde_json::to_string_pretty(&res)?);
    Ok(())
}

async fn send(url: &str, record: Observation) -> Result<PublishResponse> {
    info!("publishing {record:?} to {url}");
    let resp = reqwest::Client::new().post(url).json(&record).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        error!("gateway responded with {status}: {text}");
        bail!("publish failed ({status}): {text}");
    }
    let res = resp.json::<PublishResponse>().await?;
    for (transport, outcome) in [("kafka", &res.kafka), ("rabbit", &res.rabbit)] {
        if outcome.success {
            info!("{transport}: {}", outcome.info);
        } else {
            warn!("{transport} did not accept the record: {}", outcome.info);
        }
    }
    Ok(res)
}
