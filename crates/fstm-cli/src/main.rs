//! `grading` — evaluate the built-in reference engine under the bank
//! workload and report its timings.
//!
//! Exit codes: 0 on success, 1 on usage or correctness failure, 2 on a
//! deadline overrun or worker panic (the process quits immediately — a
//! misbehaving engine may still hold locks, so nothing waits on it).

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use fstm_core::ReferenceTm;
use fstm_harness::{Deadlines, evaluate};
use fstm_types::RunParams;

fn usage(program: &str) -> i32 {
    println!("Usage: {program} <seed>");
    1
}

fn print_params(params: &RunParams) {
    println!("⎧ #worker threads:     {}", params.nbworkers);
    println!("⎪ #TX per worker:      {}", params.nbtxperwrk);
    println!("⎪ #repetitions:        {}", params.nbrepeats);
    println!("⎪ Initial #accounts:   {}", params.nbaccounts);
    println!("⎪ Expected #accounts:  {}", params.expnbaccounts);
    println!("⎪ Initial balance:     {}", params.init_balance);
    println!("⎪ Long TX probability: {}", params.prob_long);
    println!("⎪ Allocation TX prob.: {}", params.prob_alloc);
    println!("⎪ Slow trigger factor: {}", params.slow_factor);
    println!("⎩ Seed value:          {}", params.seed);
}

fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("FSTM_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "grading".to_owned());
    let Some(seed_arg) = args.next() else {
        return usage(&program);
    };
    let Ok(seed) = seed_arg.parse::<u64>() else {
        return usage(&program);
    };

    let params = RunParams::derive(seed);
    print_params(&params);

    println!("⎧ Evaluating the reference engine...");
    match evaluate(Arc::new(ReferenceTm), &params, &Deadlines::UNBOUNDED) {
        Ok(eval) => {
            println!("⎪ Total user execution time: {} ms", eval.total_ms);
            println!("⎩ Average TX execution time: {} ns", eval.avg_tx_ns);
            0
        }
        Err(error) if error.exit_code() == 2 => {
            eprintln!("⎪ *** EXCEPTION ***");
            eprintln!("⎩ {error}");
            // Workers may be detached and wedged; quit without waiting.
            2
        }
        Err(error) => {
            println!("⎩ {error}");
            1
        }
    }
}

fn main() {
    std::process::exit(run());
}
