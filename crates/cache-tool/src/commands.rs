//! One function per command. Reports go to stdout, the collected errata are returned.

use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

use cache_rs::allocator::VolumeAllocator;
use cache_rs::cache::url::hex;
use cache_rs::cache::{Cache, SpanDumpDepth};
use cache_rs::config::ToolConfig;
use cache_rs::errata::{CacheError, Errata};

use crate::cli::{AllocTarget, ClearTarget, Cli, Command, FindTarget, ListDetail};

pub fn run(cli: &Cli, config: ToolConfig) -> anyhow::Result<Errata> {
    let mut out = io::stdout().lock();
    let spans = cli.spans.as_deref();
    match &cli.command {
        Command::List { detail } => {
            let depth = match detail {
                Some(ListDetail::Stripes) => SpanDumpDepth::Stripe,
                None => SpanDumpDepth::Span,
            };
            list(&mut out, config, spans, depth)
        }
        Command::Clear => clear(config, spans, None),
        Command::Clearspan {
            target: ClearTarget::Span,
        } => {
            let Some(device) = cli.device.as_deref() else {
                return Ok(CacheError::Input("clearspan requires --device".into()).into());
            };
            clear(config, spans, Some(device))
        }
        Command::Check => check(&mut out, config, spans),
        Command::Volumes => allocate(&mut out, config, spans, cli.volumes.as_deref(), false),
        Command::Alloc {
            target: AllocTarget::Free,
        } => allocate(&mut out, config, spans, cli.volumes.as_deref(), true),
        Command::Find {
            target: FindTarget::Url,
        } => {
            let Some(input) = cli.input.as_deref() else {
                return Ok(CacheError::Input("find url requires --input".into()).into());
            };
            find(&mut out, config, spans, input)
        }
    }
}

/// Load the spans, or return the errata if none could be loaded.
fn load_cache(config: ToolConfig, spans: Option<&Path>) -> Result<(Cache, Errata), Errata> {
    let mut cache = Cache::new(config);
    let zret = cache.load_span(spans);
    if cache.spans.is_empty() {
        return Err(zret);
    }
    Ok((cache, zret))
}

fn list(
    out: &mut impl Write,
    config: ToolConfig,
    spans: Option<&Path>,
    depth: SpanDumpDepth,
) -> anyhow::Result<Errata> {
    let (mut cache, mut zret) = match load_cache(config, spans) {
        Ok(loaded) => loaded,
        Err(zret) => return Ok(zret),
    };
    let (text, errs) = cache.dump_spans(depth);
    zret.extend(errs);
    write!(out, "{text}{}", cache.dump_volumes()).context("writing span listing")?;
    Ok(zret)
}

fn clear(config: ToolConfig, spans: Option<&Path>, device: Option<&Path>) -> anyhow::Result<Errata> {
    let (mut cache, mut zret) = match load_cache(config, spans) {
        Ok(loaded) => loaded,
        Err(zret) => return Ok(zret),
    };

    let mut matched = 0;
    for span in &mut cache.spans {
        if let Some(prefix) = device {
            let path = span.path.as_os_str().as_encoded_bytes();
            if !path.starts_with(prefix.as_os_str().as_encoded_bytes()) {
                continue;
            }
        }
        matched += 1;
        info!(span = %span.path.display(), "clearing span");
        if let Err(e) = span.clear_permanently() {
            zret.push(e);
        }
    }
    if matched == 0 {
        warn!("no span matched");
    }
    Ok(zret)
}

fn check(out: &mut impl Write, config: ToolConfig, spans: Option<&Path>) -> anyhow::Result<Errata> {
    let (mut cache, mut zret) = match load_cache(config, spans) {
        Ok(loaded) => loaded,
        Err(zret) => return Ok(zret),
    };

    let (reports, errs) = cache.check_directories();
    zret.extend(errs);
    let mut repaired = 0;
    for report in &reports {
        write!(out, "{report}").context("writing directory report")?;
        repaired += report.repaired_segments();
    }
    writeln!(
        out,
        "Checked {} stripes, {repaired} segments needed repair",
        reports.len()
    )
    .context("writing directory report")?;
    Ok(zret)
}

fn allocate(
    out: &mut impl Write,
    config: ToolConfig,
    spans: Option<&Path>,
    volumes: Option<&Path>,
    only_empty: bool,
) -> anyhow::Result<Errata> {
    let mut va = VolumeAllocator::new(config);
    let mut zret = match va.load(spans, volumes) {
        Ok(zret) => zret,
        Err(zret) => return Ok(zret),
    };
    zret.extend(if only_empty {
        va.fill_empty_spans()
    } else {
        va.fill_all_spans()
    });

    for (idx, size) in va.allocated() {
        writeln!(out, "Volume {idx} allocated {size}").context("writing allocation")?;
    }
    write!(out, "{}", va.dump_volumes()).context("writing allocation")?;
    Ok(zret)
}

fn find(
    out: &mut impl Write,
    config: ToolConfig,
    spans: Option<&Path>,
    input: &Path,
) -> anyhow::Result<Errata> {
    let (mut cache, mut zret) = match load_cache(config, spans) {
        Ok(loaded) => loaded,
        Err(zret) => return Ok(zret),
    };
    zret.extend(cache.load_urls(input));
    cache.build_stripe_hash_table();

    for url in &cache.urls {
        let key = url.key();
        let line = match cache.key_to_stripe(&key) {
            Some(stripe) => format!("stripe '{}'", stripe.hash_text()),
            None => "no stripe".to_owned(),
        };
        writeln!(out, "{url} key {} -> {line}", hex(&key)).context("writing lookup result")?;
    }
    Ok(zret)
}
