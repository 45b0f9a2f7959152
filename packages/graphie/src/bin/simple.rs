//! graphie-simple: builds a small categories / dates / persons graph on
//! the happy driver and prints each node's degree.

use std::path::PathBuf;

use anyhow::{Context, Result};
use graphie::{attrs, DriverRegistry, Graph, HappyConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!("graphie-simple {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: graphie-simple [<data-dir>] [--config <happy.json>]");
    println!();
    println!("Arguments:");
    println!("  <data-dir>     Directory holding the database (default: system temp dir)");
    println!("  --config       JSON file with happy engine settings");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let config_arg = args.iter().position(|a| a == "--config").map(|i| i + 1);
    let config = match config_arg.and_then(|i| args.get(i)).map(PathBuf::from) {
        Some(path) => HappyConfig::read_from(&path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => HappyConfig {
            bloom_bits: 1 << 20,
            ..HappyConfig::default()
        },
    };

    let data_dir = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(i, a)| !a.starts_with("--") && Some(*i) != config_arg)
        .map(|(_, a)| PathBuf::from(a))
        .unwrap_or_else(|| std::env::temp_dir().join(format!("graphie-simple-{}", std::process::id())));

    let registry = DriverRegistry::with_defaults(config);
    let graph = Graph::open(&registry, "happy", &data_dir, "test")
        .with_context(|| format!("opening graph in {}", data_dir.display()))?;
    info!(path = %data_dir.display(), "graph opened");

    let date = graph.labels(&["date"]);
    let category = graph.labels(&["category"]);
    let person = graph.labels(&["person"]);

    category.ensure_index_nodes("name")?;

    let science = category.add(attrs! { "name" => "Science" })?;
    let formal_science = category.add(attrs! { "name" => "Formal science" })?;
    let maths = category.add(attrs! { "name" => "Mathematics" })?;
    let number_theory = category.add(attrs! { "name" => "Number theory" })?;
    let analysis = category.add(attrs! { "name" => "Analysis" })?;
    let algebra = category.add(attrs! { "name" => "Algebra" })?;
    let law = category.add(attrs! { "name" => "Law" })?;
    let theology = category.add(attrs! { "name" => "Theology" })?;

    let y_1665 = date.add(attrs! { "year" => 1665 })?;
    let y_1918 = date.add(attrs! { "year" => 1918 })?;
    let d_16_january = date.add(attrs! { "day" => 16, "month" => 1 })?;

    let cantor = person.add(attrs! { "fullname" => "Georg Cantor" })?;
    let fermat = person.add(attrs! { "fullname" => "Pierre de Fermat" })?;
    let hilbert = person.add(attrs! { "fullname" => "David Hilbert" })?;
    let pappus = person.add(attrs! { "fullname" => "Johannes Pappus" })?;

    let edges = [
        (law, science, "instance_of"),
        (theology, science, "instance_of"),
        (formal_science, science, "instance_of"),
        (maths, formal_science, "instance_of"),
        (maths, number_theory, "contains"),
        (maths, analysis, "contains"),
        (maths, algebra, "contains"),
        (cantor, maths, "field_of_profession"),
        (fermat, maths, "field_of_profession"),
        (fermat, law, "field_of_profession"),
        (hilbert, maths, "field_of_profession"),
        (fermat, y_1665, "date_of_death"),
        (cantor, y_1918, "date_of_death"),
        (cantor, d_16_january, "date_of_death"),
        (pappus, d_16_january, "date_of_birth"),
        (pappus, theology, "field_of_profession"),
    ];
    for (from, to, name) in edges {
        graph.link(from, to, attrs! { "name" => name })?;
    }

    for id in science..=pappus {
        let node = graph.node(id)?;
        let title = node
            .attrs
            .get("name")
            .or_else(|| node.attrs.get("fullname"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", node.attrs));
        println!(
            "{:>3} {:<10} {:<20} out={} in={}",
            id,
            node.labels.join(","),
            title,
            node.links_out.len(),
            node.links_in.len()
        );
    }

    graph.close().context("closing graph")?;
    Ok(())
}
