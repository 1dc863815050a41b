use clap::Parser;
use tracing_subscriber::EnvFilter;

mod class;
mod classloader;
mod cpool;
mod exceptions;
mod frame;
mod gfunction;
mod globals;
mod interpreter;
mod native;
mod object;
mod opcodes;
mod shutdown;
mod statics;
mod string_pool;
mod thread;
mod types;

#[derive(Parser)]
#[command(name = "kava", version, about = "A Java Virtual Machine core")]
struct Args {
    /// Class whose main method to run (dotted or slash form)
    class: String,
    /// Arguments passed through to the Java main method
    program_args: Vec<String>,
    /// Trace every executed bytecode and stack operation
    #[arg(short, long)]
    trace: bool,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // startup order: globals, thread table, string pool, classloader, base classes
    globals::init_globals("kava");
    globals::set_trace(args.trace);
    string_pool::init();
    classloader::jmod::map_init();
    if let Err(e) = classloader::init() {
        eprintln!("classloader initialization failed: {e}");
        shutdown::exit(shutdown::UNKNOWN_ERROR);
        return;
    }
    classloader::load_base_classes();

    let class_name = args.class.replace('.', "/");
    match interpreter::run_main_method(&class_name, &args.program_args) {
        Ok(()) => {
            shutdown::exit(shutdown::OK);
        }
        Err(ex) => {
            exceptions::report_uncaught(&ex);
            shutdown::exit(shutdown::JVM_EXCEPTION);
        }
    }
}
