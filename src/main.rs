use clap::Parser;
use log::debug;

use signprep::Opts;
use signprep::cli::SubCommandExtend;
use signprep::config::SubCommand;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();
    debug!("{:?}", opts);

    let result = match &opts.subcmd {
        SubCommand::Filter(config) => config.run(&opts),
        SubCommand::Vectorize(config) => config.run(&opts),
        SubCommand::Predict(config) => config.run(&opts),
    };

    if let Err(e) = result {
        eprintln!("错误: {e:?}");
        std::process::exit(1);
    }
}
