extern crate clap;
use crossbeam_channel::bounded; // Inter-thread communication
use ctrlc; // exit using cntrl-c
use env_logger;
use log::error;

// Internal project modules
use rkos_core::interrupts::DiskReply;
use rkos_core::kernel::Kernel;
use rkos_core::scheduler::SchedulerKind;
use rkos_core::utils;
use rkos_peripherals::{ConsoleSink, RamStore, StdinKeyboard};

// Simulated clock rate: one kernel pulse per this many microseconds
const CLOCK_PULSE_MICROS: f64 = 100.0;

// Built-in demonstration programs, as the 2-hex-digit byte tokens the
// loader accepts. The first counts 1 to 3 and prints " done"; the
// second prints a greeting.
const DEMO_COUNT: &str = "A9 01 8D 30 00 A2 01 AC 30 00 FF EE 30 00 A2 04 EC 30 00 \
                          D0 F0 A2 02 A0 1B FF 00 20 64 6F 6E 65 00";
const DEMO_GREET: &str = "A2 02 A0 06 FF 00 68 69 20 66 72 6F 6D 20 72 6B 6F 73 00";

/// Configures command-line interface using clap
fn get_cli_config<'a>() -> clap::ArgMatches<'a> {
    let description = "Operating-system kernel simulator in Rust";
    clap::App::new("RKOS")
        .version("0.1")
        .about(description)
        .arg(
            clap::Arg::with_name("scheduler")
                .long("scheduler")
                .short("s")
                .takes_value(true)
                .possible_values(&["fcfs", "rr", "priority"])
                .default_value("rr")
                .help("Ready-queue discipline"),
        )
        .arg(
            clap::Arg::with_name("quantum")
                .long("quantum")
                .short("q")
                .takes_value(true)
                .default_value("6")
                .help("Round-Robin quantum in CPU cycles"),
        )
        .arg(
            clap::Arg::with_name("priority")
                .long("priority")
                .short("p")
                .takes_value(true)
                .default_value("3")
                .help("Scheduling priority for the loaded programs"),
        )
        .arg(
            clap::Arg::with_name("step")
                .long("step")
                .help("Single-step mode: press 's' to execute one cycle, 'q' to quit"),
        )
        .arg(
            clap::Arg::with_name("programs")
                .multiple(true)
                .help("Program files of 2-hex-digit byte tokens; demos run when omitted"),
        )
        .get_matches()
}

fn scheduler_kind(name: &str) -> SchedulerKind {
    match name {
        "fcfs" => SchedulerKind::Fcfs,
        "priority" => SchedulerKind::Priority,
        _ => SchedulerKind::RoundRobin,
    }
}

/// Reads program images from the given files, or falls back to the
/// built-in demos
fn collect_programs(matches: &clap::ArgMatches) -> Result<Vec<Vec<u8>>, String> {
    let mut programs = Vec::new();
    match matches.values_of("programs") {
        Some(paths) => {
            for path in paths {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| format!("cannot read {}: {}", path, e))?;
                let bytes = utils::parse_hex_program(&text)
                    .map_err(|e| format!("{}: {}", path, e))?;
                programs.push(bytes);
            }
        }
        None => {
            programs.push(utils::parse_hex_program(DEMO_COUNT).unwrap());
            programs.push(utils::parse_hex_program(DEMO_GREET).unwrap());
        }
    }
    Ok(programs)
}

/// Main entry point for the kernel simulator
fn main() {
    env_logger::init();

    // Set up Ctrl-C handler with channel communication
    let (signal_sender, signal_receiver) = bounded(1);
    let handler_result = ctrlc::set_handler(move || {
        if signal_sender.is_full() {
            std::process::exit(-1); // Emergency exit if channel blocked
        }
        let _send_result = signal_sender.send(()); // Send shutdown signal
    });

    if let Err(e) = handler_result {
        error!("Signal handler failed: {:?}", e);
        return;
    }

    // Parse command-line arguments
    let cli_matches = get_cli_config();
    let kind = scheduler_kind(cli_matches.value_of("scheduler").unwrap());
    let quantum: u32 = match cli_matches.value_of("quantum").unwrap().parse() {
        Ok(q) => q,
        Err(_) => {
            error!("quantum must be a positive integer");
            return;
        }
    };
    let priority: u8 = match cli_matches.value_of("priority").unwrap().parse() {
        Ok(p) => p,
        Err(_) => {
            error!("priority must fit in a byte");
            return;
        }
    };
    let programs = match collect_programs(&cli_matches) {
        Ok(programs) => programs,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };

    // Initialize host devices and the kernel around them
    let mut store = RamStore::new();
    let mut sink = ConsoleSink::new();
    let keyboard = StdinKeyboard::new();
    let mut kernel = Kernel::bootstrap(&mut store, &mut sink);

    kernel.set_scheduler(kind);
    kernel.set_quantum(quantum);
    kernel.set_single_step(cli_matches.is_present("step"));

    // A formatted disk is required before anything can swap
    kernel.format_disk(Box::new(|reply, _| {
        if let DiskReply::Failed(err) = reply {
            error!("disk format failed: {}", err);
        }
    }));
    kernel.on_clock_pulse();

    for program in &programs {
        kernel.load_program(program, priority);
    }
    kernel.run_all_residents();

    // Main simulation loop
    let mut cycle_timer = std::time::Instant::now();
    loop {
        if !signal_receiver.is_empty() {
            break;
        }

        // Feed host keys through the keyboard interrupt path
        while let Some(c) = keyboard.try_key() {
            kernel.key_pressed(c);
        }

        // Timing control: run as many pulses as wall-clock time owes us
        let elapsed_time = cycle_timer.elapsed();
        if elapsed_time.as_millis() == 0 {
            // Prevent busy-waiting at high speeds
            std::thread::sleep(std::time::Duration::from_micros(500));
            continue;
        }

        let target_pulses = (elapsed_time.as_micros() as f64 / CLOCK_PULSE_MICROS) as i64;
        for _ in 0..target_pulses {
            kernel.on_clock_pulse();
        }

        // Host-level control keys typed while the simulation runs
        while let Some(c) = kernel.take_input() {
            match c {
                'q' => {
                    kernel.shutdown();
                    return;
                }
                's' => kernel.request_step(),
                _ => {}
            }
        }

        if kernel.is_idle() {
            break;
        }

        // Reset timing for next frame
        cycle_timer = std::time::Instant::now();
    }

    kernel.shutdown();
}
