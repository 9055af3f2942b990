//! Inspect compilation and evaluation of the engine's seed scenarios
//! (spec §8) without writing a test harness: `rule_debug list` enumerates
//! them, `rule_debug run <name>` compiles, disassembles and iterates one,
//! optionally as JSON for scripting.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ecs_rule_engine::config::EngineConfig;
use ecs_rule_engine::id::EntityId;
use ecs_rule_engine::rule::Rule;
use ecs_rule_engine::storage::InMemoryWorld;
use ecs_rule_engine::term::{Term, TermArg};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "rule_debug", about = "Compile and run the engine's seed query scenarios")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the available seed scenarios.
    List,
    /// Compile, disassemble and iterate a scenario.
    Run {
        scenario: String,
        /// Emit each yield as a JSON object instead of plain text.
        #[arg(long)]
        json: bool,
        /// Skip the disassembly listing.
        #[arg(long)]
        quiet: bool,
    },
}

/// A single seed scenario: the world it needs, the terms to compile, and
/// an expression string purely for disassembly/diagnostics.
struct Scenario {
    name: &'static str,
    describe: fn() -> (InMemoryWorld, Vec<Term>, &'static str),
}

const SCENARIOS: &[Scenario] = &[
    Scenario { name: "fact", describe: scenario_fact },
    Scenario { name: "variable", describe: scenario_variable },
    Scenario { name: "pair-var", describe: scenario_pair_var },
    Scenario { name: "transitive-subset", describe: scenario_transitive_subset },
    Scenario { name: "transitive-superset", describe: scenario_transitive_superset },
    Scenario { name: "negation", describe: scenario_negation },
    Scenario { name: "optional", describe: scenario_optional },
    Scenario { name: "same-var-pair", describe: scenario_same_var_pair },
];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::List => {
            for s in SCENARIOS {
                println!("{}", s.name);
            }
            Ok(())
        }
        Command::Run { scenario, json, quiet } => run(&scenario, json, quiet),
    }
}

fn run(name: &str, json: bool, quiet: bool) -> Result<()> {
    let scenario = SCENARIOS
        .iter()
        .find(|s| s.name == name)
        .with_context(|| format!("unknown scenario '{name}', see `rule_debug list`"))?;

    let (world, terms, expr) = (scenario.describe)();
    let config = EngineConfig::default();
    let rule = Rule::new(&terms, Some(expr), &world, &config)
        .map_err(|e| anyhow::anyhow!("compile error: {e}"))?;

    if !quiet {
        println!("{}", rule.disassemble());
    }

    let mut iter = rule.iter(&world, &config);
    let mut yields = Vec::new();
    while iter.next() {
        yields.push(Yield {
            entities: iter.entities().iter().map(|e| e.0).collect(),
            columns: iter.columns(),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&yields)?);
    } else {
        for (i, y) in yields.iter().enumerate() {
            println!("yield {i}: entities={:?} columns={:?}", y.entities, y.columns);
        }
        if yields.is_empty() {
            bail!("scenario '{name}' produced no yields");
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Yield {
    entities: Vec<u64>,
    columns: Vec<i32>,
}

fn scenario_fact() -> (InMemoryWorld, Vec<Term>, &'static str) {
    let mut world = InMemoryWorld::new();
    let creature = EntityId::new(1, 0);
    let yoda = EntityId::new(100, 0);
    world.add(yoda, creature);
    let terms = vec![Term::new(TermArg::id(creature), TermArg::var("."))];
    (world, terms, "Creature(this)")
}

fn scenario_variable() -> (InMemoryWorld, Vec<Term>, &'static str) {
    let mut world = InMemoryWorld::new();
    let position = EntityId::new(1, 0);
    world.add(EntityId::new(100, 0), position);
    world.add(EntityId::new(101, 0), position);
    let terms = vec![Term::new(TermArg::id(position), TermArg::var("."))];
    (world, terms, "Position(this)")
}

fn scenario_pair_var() -> (InMemoryWorld, Vec<Term>, &'static str) {
    let mut world = InMemoryWorld::new();
    let home_planet = EntityId::new(1, 0);
    let tatooine = EntityId::new(2, 0);
    let luke = EntityId::new(10, 0);
    world.add_pair(luke, home_planet, tatooine);
    let terms = vec![Term::with_object(
        TermArg::id(home_planet),
        TermArg::id(luke),
        TermArg::var("_Planet"),
    )];
    (world, terms, "HomePlanet(luke, _Planet)")
}

fn scenario_transitive_subset() -> (InMemoryWorld, Vec<Term>, &'static str) {
    let mut world = InMemoryWorld::new();
    let is_a = EntityId::new(1, 0);
    let vehicle = EntityId::new(2, 0);
    let car = EntityId::new(3, 0);
    let sedan = EntityId::new(4, 0);
    world.mark_transitive(is_a);
    world.add_pair(car, is_a, vehicle);
    world.add_pair(sedan, is_a, car);
    let terms = vec![Term::with_object(TermArg::id(is_a), TermArg::var("."), TermArg::id(vehicle))];
    (world, terms, "IsA(this, Vehicle)")
}

fn scenario_transitive_superset() -> (InMemoryWorld, Vec<Term>, &'static str) {
    let mut world = InMemoryWorld::new();
    let is_a = EntityId::new(1, 0);
    let vehicle = EntityId::new(2, 0);
    let car = EntityId::new(3, 0);
    let sedan = EntityId::new(4, 0);
    world.mark_transitive(is_a);
    world.add_pair(car, is_a, vehicle);
    world.add_pair(sedan, is_a, car);
    let terms = vec![Term::with_object(TermArg::id(is_a), TermArg::id(sedan), TermArg::var("."))];
    (world, terms, "IsA(sedan, this)")
}

fn scenario_negation() -> (InMemoryWorld, Vec<Term>, &'static str) {
    let mut world = InMemoryWorld::new();
    let position = EntityId::new(1, 0);
    let frozen = EntityId::new(2, 0);
    let moving = EntityId::new(100, 0);
    let stuck = EntityId::new(101, 0);
    world.add_type(moving, vec![position]);
    world.add_type(stuck, vec![position, frozen]);
    let terms = vec![
        Term::new(TermArg::id(position), TermArg::var(".")),
        Term::new(TermArg::id(frozen), TermArg::var(".")).not(),
    ];
    (world, terms, "Position(this), !Frozen(this)")
}

fn scenario_optional() -> (InMemoryWorld, Vec<Term>, &'static str) {
    let mut world = InMemoryWorld::new();
    let tag_a = EntityId::new(1, 0);
    let tag_b = EntityId::new(2, 0);
    world.add(EntityId::new(10, 0), tag_a);
    world.add_type(EntityId::new(11, 0), vec![tag_a, tag_b]);
    let terms = vec![
        Term::new(TermArg::id(tag_a), TermArg::var(".")),
        Term::new(TermArg::id(tag_b), TermArg::var(".")).optional(),
    ];
    (world, terms, "TagA(this), ?TagB(this)")
}

fn scenario_same_var_pair() -> (InMemoryWorld, Vec<Term>, &'static str) {
    let mut world = InMemoryWorld::new();
    let a = EntityId::new(1, 0);
    let b = EntityId::new(2, 0);
    let e1 = EntityId::new(100, 0);
    let e2 = EntityId::new(101, 0);
    world.add_pair(e1, a, b);
    world.add_pair(e2, a, a);
    let terms = vec![Term::with_object(TermArg::var("_X"), TermArg::var("."), TermArg::var("_X"))];
    (world, terms, "_X(this, _X)")
}
