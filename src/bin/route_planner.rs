use anyhow::Result;
use clap::Parser;
use rover::{
    logging,
    navigation::{load_mission, NavigationConfig, WaypointNavigator},
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Plans a route over a mission file")]
struct Args {
    /// JSON waypoint list
    mission: PathBuf,

    /// Keep the waypoints in file order
    #[arg(long)]
    no_optimize: bool,

    /// Cap on 2-opt sweeps
    #[arg(long, default_value_t = 100)]
    iterations: usize,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbosity);

    let mut navigator = WaypointNavigator::new(NavigationConfig {
        two_opt_iterations: args.iterations,
        ..Default::default()
    });
    for waypoint in load_mission(&args.mission)? {
        navigator.push_waypoint(waypoint);
    }

    let optimize = !args.no_optimize;
    navigator.plan_route(optimize);
    let swaps = if optimize {
        navigator.optimize_route()
    } else {
        0
    };

    for (index, leg) in navigator.route_legs().iter().enumerate() {
        println!(
            "{:>3}. {} -> {}  {:.1} m  {:.0}°",
            index + 1,
            leg.from.name(),
            leg.to.name(),
            leg.distance_m,
            leg.bearing_deg
        );
    }
    println!("total {:.1} m, 2-opt swaps {}", navigator.total_distance(), swaps);
    Ok(())
}
