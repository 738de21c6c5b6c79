use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};

use tilemosaic::config::MosaicSettings;

const USAGE: &str = "Usage: tilemosaic [options] <service-url> <output-dir>\n       tilemosaic plan [options] <service-url>\n\nOptions:\n  --config <file>          JSON layer file (flags override its values)\n  --resolution <r>         ground resolution per pixel, in service CRS units\n  --bbox <minx,miny,maxx,maxy>\n  --bbox-crs <crs>         CRS of --bbox (default EPSG:4326)\n  --threads <N>            concurrent tile requests (default 4)\n  --retries <N>            retries per tile after transient failures (default 0)\n  --timeout <seconds>      per-request timeout (default 30)\n  --max-tiles <N>          refuse retrievals needing more tiles (default 4096)\n  --no-blank-tiles         fail on missing tiles instead of requesting filler images";

pub enum Command {
    Fetch(FetchConfig),
    Plan(PlanConfig),
}

pub struct FetchConfig {
    pub config: Option<PathBuf>,
    pub settings: MosaicSettings,
    pub output: PathBuf,
}

pub struct PlanConfig {
    pub config: Option<PathBuf>,
    pub settings: MosaicSettings,
}

pub fn parse_args(args: &[String]) -> Result<Command> {
    if args.is_empty() {
        bail!("No arguments supplied.\n{USAGE}");
    }

    if args[0] == "plan" {
        let (config, settings, positionals) = parse_options(&args[1..])?;
        let settings = with_url(settings, &positionals)?;
        return Ok(Command::Plan(PlanConfig { config, settings }));
    }

    let (config, settings, mut positionals) = parse_options(args)?;
    let output = positionals
        .pop()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("Missing output directory argument.\n{USAGE}"))?;
    let settings = with_url(settings, &positionals)?;
    Ok(Command::Fetch(FetchConfig {
        config,
        settings,
        output,
    }))
}

/// The service URL may be left out when the config file provides one.
fn with_url(mut settings: MosaicSettings, positionals: &[String]) -> Result<MosaicSettings> {
    match positionals {
        [] => Ok(settings),
        [url] => {
            settings.url = Some(url.clone());
            Ok(settings)
        }
        _ => bail!("Unexpected arguments: {}\n{USAGE}", positionals.join(" ")),
    }
}

fn parse_options(args: &[String]) -> Result<(Option<PathBuf>, MosaicSettings, Vec<String>)> {
    let mut config = None;
    let mut settings = MosaicSettings::default();
    let mut positionals = Vec::new();

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if arg == "--help" || arg == "-h" {
            println!("{USAGE}");
            std::process::exit(0);
        } else if arg == "--no-blank-tiles" {
            settings.blank_tiles = Some(false);
        } else if let Some((flag, inline)) = split_flag(arg) {
            let value = match inline {
                Some(value) => value.to_string(),
                None => {
                    i += 1;
                    args.get(i)
                        .cloned()
                        .ok_or_else(|| anyhow!("Missing value for {flag}\n{USAGE}"))?
                }
            };
            match flag {
                "--config" => config = Some(PathBuf::from(value)),
                "--resolution" => settings.resolution = Some(parse_number(flag, &value)?),
                "--bbox" => settings.bbox = Some(parse_bbox(&value)?),
                "--bbox-crs" => settings.bbox_crs = Some(value),
                "--threads" => settings.threads = Some(parse_count(flag, &value)?),
                "--retries" => settings.retries = Some(parse_number(flag, &value)?),
                "--timeout" => settings.timeout_seconds = Some(parse_number(flag, &value)?),
                "--max-tiles" => settings.max_tiles = Some(parse_count(flag, &value)?),
                _ => bail!("Unknown option: {flag}\n{USAGE}"),
            }
        } else if arg.starts_with("--") {
            bail!("Unknown option: {arg}\n{USAGE}");
        } else {
            positionals.push(arg.clone());
        }
        i += 1;
    }

    Ok((config, settings, positionals))
}

const VALUE_FLAGS: [&str; 8] = [
    "--config",
    "--resolution",
    "--bbox",
    "--bbox-crs",
    "--threads",
    "--retries",
    "--timeout",
    "--max-tiles",
];

/// Matches `--flag value` and `--flag=value` forms of the flags taking a value.
fn split_flag(arg: &str) -> Option<(&'static str, Option<&str>)> {
    VALUE_FLAGS.iter().find_map(|flag| {
        if arg == *flag {
            Some((*flag, None))
        } else {
            arg.strip_prefix(flag)
                .and_then(|rest| rest.strip_prefix('='))
                .map(|value| (*flag, Some(value)))
        }
    })
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("Invalid value '{value}' for {flag}"))
}

fn parse_count(flag: &str, value: &str) -> Result<usize> {
    let count: usize = parse_number(flag, value)?;
    if count == 0 {
        bail!("{flag} must be > 0");
    }
    Ok(count)
}

fn parse_bbox(value: &str) -> Result<[f64; 4]> {
    let parts = value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| anyhow!("Invalid coordinate '{part}' in --bbox"))
        })
        .collect::<Result<Vec<_>>>()?;
    <[f64; 4]>::try_from(parts)
        .map_err(|_| anyhow!("--bbox expects four comma-separated numbers: minx,miny,maxx,maxy"))
}
