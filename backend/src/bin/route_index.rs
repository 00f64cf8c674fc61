use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use backend::config::ROUTE_INDEX_PRECISION;
use backend::geohash::Precision;
use backend::route_index::build_route_index;
use clap::Parser;
use rayon::prelude::*;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Compute geohash coverage sets for encoded route polylines"
)]
struct Args {
    /// Encoded polylines to index
    polylines: Vec<String>,

    /// File with one polyline per line ("-" reads stdin)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Geohash length; must match the server's GEOHASH_PRECISION
    #[arg(long, default_value_t = ROUTE_INDEX_PRECISION.chars() as u8)]
    precision: u8,

    /// Write JSON here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct IndexedRoute {
    line: usize,
    polyline: String,
    cells: Vec<String>,
}

fn read_input(path: &PathBuf) -> io::Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        fs::read_to_string(path)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();
    let precision = Precision::new(args.precision)?;

    let mut polylines = args.polylines.clone();
    if let Some(path) = &args.input {
        let contents = read_input(path)?;
        polylines.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }
    tracing::info!("indexing {} polylines at precision {precision}", polylines.len());

    let indexed: Vec<IndexedRoute> = polylines
        .into_par_iter()
        .enumerate()
        .map(|(i, polyline)| -> Result<IndexedRoute, String> {
            let cells = build_route_index(&polyline, precision)
                .map_err(|err| format!("polyline #{}: {err}", i + 1))?;
            Ok(IndexedRoute {
                line: i + 1,
                polyline,
                cells: cells.to_strings(),
            })
        })
        .collect::<Result<_, String>>()?;

    let total_cells: usize = indexed.iter().map(|r| r.cells.len()).sum();
    tracing::info!("indexed {} routes, {total_cells} cells", indexed.len());

    match &args.output {
        Some(path) => {
            serde_json::to_writer_pretty(fs::File::create(path)?, &indexed)?;
            tracing::info!("coverage written to {:?}", path);
        }
        None => {
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &indexed)?;
            writeln!(stdout)?;
        }
    }

    Ok(())
}
