use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};

use fueleu_compliance::{
    adjusted_cb_for_year, available_balance, banking, compare_to_baseline, compute_and_snapshot,
    create_pool, list_entries, load_routes_csv, seed_routes, set_baseline, PoolMemberInput,
    RouteFilter, RouteStore, SqliteStore,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "seed" => run_seed(args.get(2).map(String::as_str)),
        "routes" => run_routes(args.get(2).map(String::as_str)),
        "baseline" => run_baseline(&require_arg(&args, 2, "route id")?),
        "compare" => run_compare(),
        "cb" => run_cb(
            &require_arg(&args, 2, "ship id")?,
            parse_year(&require_arg(&args, 3, "year")?)?,
        ),
        "adjusted" => run_adjusted(parse_year(&require_arg(&args, 2, "year")?)?),
        "bank" | "apply" => run_banking(
            args[1].as_str(),
            &require_arg(&args, 2, "ship id")?,
            parse_year(&require_arg(&args, 3, "year")?)?,
            require_arg(&args, 4, "amount")?
                .parse::<i64>()
                .context("amount must be an integer gCO2e value")?,
        ),
        "records" => run_records(
            &require_arg(&args, 2, "ship id")?,
            parse_year(&require_arg(&args, 3, "year")?)?,
        ),
        "pool" => run_pool(parse_year(&require_arg(&args, 2, "year")?)?, &args[3..]),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("FuelEU Compliance CLI");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  fueleu seed [routes.csv]         seed the route catalogue");
    println!("  fueleu routes [year]             list routes");
    println!("  fueleu baseline <routeId>        flag a route as baseline");
    println!("  fueleu compare                   compare routes to the baseline");
    println!("  fueleu cb <shipId> <year>        compute + snapshot a CB");
    println!("  fueleu adjusted <year>           adjusted CB per ship");
    println!("  fueleu bank <shipId> <year> <g>  deposit surplus (gCO2e)");
    println!("  fueleu apply <shipId> <year> <g> apply banked surplus (gCO2e)");
    println!("  fueleu records <shipId> <year>   list ledger entries");
    println!("  fueleu pool <year> <ship=cb>...  allocate a pool");
    println!();
    println!("  Database file: $FUELEU_DB (default ./fueleu.db)");
}

fn db_path() -> PathBuf {
    env::var("FUELEU_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("fueleu.db"))
}

fn open_store() -> Result<SqliteStore> {
    SqliteStore::open(&db_path())
}

fn require_arg(args: &[String], idx: usize, what: &str) -> Result<String> {
    match args.get(idx) {
        Some(arg) => Ok(arg.clone()),
        None => bail!("missing argument: {}", what),
    }
}

fn parse_year(raw: &str) -> Result<i32> {
    raw.parse::<i32>()
        .with_context(|| format!("invalid year: {}", raw))
}

fn run_seed(csv_arg: Option<&str>) -> Result<()> {
    let csv_path = Path::new(csv_arg.unwrap_or("data/routes.csv"));

    println!("📂 Loading routes from {:?}...", csv_path);
    let routes = load_routes_csv(csv_path)?;
    println!("✓ Loaded {} routes from CSV", routes.len());

    let store = open_store()?;
    let seeded = seed_routes(&store, &routes)?;
    println!("✓ Seeded {} routes into {:?}", seeded, db_path());

    Ok(())
}

fn run_routes(year_arg: Option<&str>) -> Result<()> {
    let store = open_store()?;
    let filter = RouteFilter {
        year: year_arg.map(parse_year).transpose()?,
        ..Default::default()
    };

    let routes = store.all_routes(&filter)?;
    println!(
        "{:<8} {:<12} {:<6} {:<6} {:>10} {:>10} {:>9}",
        "route", "vessel", "fuel", "year", "gCO2e/MJ", "fuel (t)", "baseline"
    );
    for r in &routes {
        println!(
            "{:<8} {:<12} {:<6} {:<6} {:>10.4} {:>10.1} {:>9}",
            r.route_id,
            r.vessel_type,
            r.fuel_type,
            r.year,
            r.ghg_intensity,
            r.fuel_consumption_t,
            if r.is_baseline { "✓" } else { "" }
        );
    }
    println!("\n✓ {} routes", routes.len());

    Ok(())
}

fn run_baseline(route_id: &str) -> Result<()> {
    let store = open_store()?;
    let route = set_baseline(&store, route_id)?;
    println!("✓ Baseline set: {} ({:.4} gCO2e/MJ)", route.route_id, route.ghg_intensity);
    Ok(())
}

fn run_compare() -> Result<()> {
    let store = open_store()?;
    let report = compare_to_baseline(&store)?;

    println!(
        "Baseline: {} at {:.4} gCO2e/MJ",
        report.baseline_route_id, report.baseline_intensity
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for c in &report.comparisons {
        println!(
            "{:<8} {:>9.4} gCO2e/MJ  {:>+7.2}%  {}",
            c.route_id,
            c.ghg_intensity,
            c.percent_diff,
            if c.compliant { "compliant" } else { "NOT compliant" }
        );
    }

    Ok(())
}

fn run_cb(ship_id: &str, year: i32) -> Result<()> {
    let store = open_store()?;
    let snapshot = compute_and_snapshot(&store, &store, ship_id, year)?;

    let label = if snapshot.cb_grams >= 0 { "surplus" } else { "deficit" };
    println!(
        "✓ CB for {} / {}: {} gCO2e ({})",
        ship_id, year, snapshot.cb_grams, label
    );
    println!("  Snapshot {} saved", snapshot.id);

    Ok(())
}

fn run_adjusted(year: i32) -> Result<()> {
    let store = open_store()?;
    let report = adjusted_cb_for_year(&store, year)?;

    println!("{:<10} {:>16} {:>16}", "ship", "cb before", "cb adjusted");
    for row in &report {
        println!("{:<10} {:>16} {:>16}", row.ship_id, row.cb_before, row.cb_after);
    }
    println!("\n✓ {} ships with snapshots for {}", report.len(), year);

    Ok(())
}

fn run_banking(command: &str, ship_id: &str, year: i32, amount: i64) -> Result<()> {
    let store = open_store()?;

    let entry = match command {
        "bank" => banking::deposit(&store, ship_id, year, amount)?,
        _ => banking::withdraw(&store, ship_id, year, amount)?,
    };

    println!(
        "✓ {} {} gCO2e for {} / {} (entry {})",
        if command == "bank" { "Banked" } else { "Applied" },
        amount,
        ship_id,
        year,
        entry.id
    );
    println!(
        "  Available balance: {} gCO2e",
        available_balance(&store, ship_id, year)?
    );

    Ok(())
}

fn run_records(ship_id: &str, year: i32) -> Result<()> {
    let store = open_store()?;
    let entries = list_entries(&store, ship_id, year)?;

    for e in &entries {
        println!(
            "{}  {:<10} {:>16} gCO2e",
            e.created_at.to_rfc3339(),
            e.kind.as_str(),
            e.amount_grams
        );
    }
    println!(
        "\n✓ {} entries, balance {} gCO2e",
        entries.len(),
        available_balance(&store, ship_id, year)?
    );

    Ok(())
}

fn run_pool(year: i32, member_args: &[String]) -> Result<()> {
    let mut members = Vec::new();
    for arg in member_args {
        let (ship_id, cb) = arg
            .split_once('=')
            .with_context(|| format!("expected <ship=cb>, got {}", arg))?;
        members.push(PoolMemberInput {
            ship_id: ship_id.to_string(),
            cb_before: cb
                .parse::<i64>()
                .with_context(|| format!("invalid CB for {}: {}", ship_id, cb))?,
        });
    }

    let store = open_store()?;
    let result = create_pool(&store, year, &members)?;

    println!("✓ Pool {} created for {}", result.pool_id, result.year);
    println!("{:<10} {:>16} {:>16}", "ship", "cb before", "cb after");
    for m in &result.members {
        println!("{:<10} {:>16} {:>16}", m.ship_id, m.cb_before, m.cb_after);
    }

    Ok(())
}
