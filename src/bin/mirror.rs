//! Command-line front end for the cognitive loop.
//!
//! mirror cycle <TICKER> [ACTION] [--trades path.csv|path.sqlite]
//! mirror profile [--trades path]
//! mirror explain <TICKER>
//! mirror sentiment <TICKER>
//! mirror briefing <TICKER>...
//! mirror demo-trades [N]

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use tiltmirror::config::Config;
use tiltmirror::gateway::gemini::GeminiClient;
use tiltmirror::gateway::{NullGenerator, TextGenerator};
use tiltmirror::logging::{log, obj, v_str, Domain, Level};
use tiltmirror::market::yahoo::YahooFinance;
use tiltmirror::orchestrator::{ActionInput, CognitiveLoop};
use tiltmirror::trades::{generate_mock_trades, load_trades, write_csv, TradeRecord};

const USAGE: &str = "usage: mirror \
    <cycle TICKER [ACTION] | profile | explain TICKER | sentiment TICKER | briefing TICKER... \
    | demo-trades [N]> [--trades PATH]";
const DEFAULT_MOCK_TRADES: usize = 20;

/// Splits `--trades PATH` out of the positional arguments.
fn split_args(args: Vec<String>) -> Result<(Vec<String>, Option<String>)> {
    let mut positional = Vec::new();
    let mut trades = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--trades" {
            trades = Some(iter.next().ok_or_else(|| anyhow!("--trades needs a path"))?);
        } else {
            positional.push(arg);
        }
    }
    Ok((positional, trades))
}

fn seeded_rng(cfg: &Config) -> StdRng {
    match cfg.market.synthetic_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn trade_history(cfg: &Config, path: Option<&str>) -> Result<Vec<TradeRecord>> {
    match path {
        Some(p) => load_trades(p),
        None => Ok(generate_mock_trades(DEFAULT_MOCK_TRADES, &mut seeded_rng(cfg))),
    }
}

fn build_loop(cfg: Config) -> CognitiveLoop<Box<dyn TextGenerator>, YahooFinance> {
    let generator: Box<dyn TextGenerator> = match GeminiClient::from_config(&cfg.gemini) {
        Some(client) => Box::new(client),
        None => {
            log(
                Level::Warn,
                Domain::System,
                "no_text_service",
                obj(&[("msg", v_str("GEMINI_API_KEY not set; narrative calls will fail"))]),
            );
            Box::new(NullGenerator)
        }
    };
    let provider = YahooFinance::new(&cfg.market);
    CognitiveLoop::new(generator, provider, cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let (args, trades_path) = split_args(std::env::args().skip(1).collect())?;
    let cfg = Config::from_env();
    let command = args.first().map(String::as_str).ok_or_else(|| anyhow!(USAGE))?;

    match command {
        "cycle" => {
            let ticker = args.get(1).ok_or_else(|| anyhow!(USAGE))?;
            let trades = trade_history(&cfg, trades_path.as_deref())?;
            let action = args.get(2).map(|label| ActionInput::new(label));
            let mut mirror = build_loop(cfg);
            let report = mirror.run_cycle(ticker, &trades, action).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!("{}", serde_json::to_string_pretty(&mirror.diagnostics())?);
        }
        "profile" => {
            let trades = trade_history(&cfg, trades_path.as_deref())?;
            let mut mirror = build_loop(cfg);
            let profile = mirror.initialize_profile(&trades)?;
            let bias = profile.dominant_bias;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "profile": profile,
                    "bias": {
                        "label": bias,
                        "description": bias.description(),
                        "risk_level": bias.risk_level(),
                        "intervention_priority": bias.intervention_priority(),
                    }
                }))?
            );
        }
        "explain" => {
            let ticker = args.get(1).ok_or_else(|| anyhow!(USAGE))?;
            let mut mirror = build_loop(cfg);
            let explanation = mirror.explain(ticker).await;
            println!("{}", serde_json::to_string_pretty(&explanation)?);
        }
        "sentiment" => {
            let ticker = args.get(1).ok_or_else(|| anyhow!(USAGE))?;
            let mut mirror = build_loop(cfg);
            let report = mirror.sentiment(ticker).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "briefing" => {
            if args.len() < 2 {
                return Err(anyhow!(USAGE));
            }
            let mut mirror = build_loop(cfg);
            let briefing = mirror.briefing(&args[1..]).await;
            println!("{}", briefing.text);
        }
        "demo-trades" => {
            let n = match args.get(1) {
                Some(v) => v.parse()?,
                None => DEFAULT_MOCK_TRADES,
            };
            let trades = generate_mock_trades(n, &mut seeded_rng(&cfg));
            write_csv(std::io::stdout().lock(), &trades)?;
        }
        other => return Err(anyhow!("unknown command '{}'\n{}", other, USAGE)),
    }
    Ok(())
}
