// External Modules
extern crate pest;
extern crate exitcode;
#[macro_use]
extern crate pest_derive;

// Internal Modules
mod optimizer;
use optimizer::{OptimizationKnob, Optimizer, TransformConfig};
use optimizer::parser::AstParser;

// Standard Imports
use clap::Parser;

// Basic Optimizer Configuration
type PARSER = optimizer::PestMorayParser;


/// Command Line interface struct
/// Describes possible arguments using the clap library
#[derive(Parser)]
struct OptimizerCLIOptions {
    /// Path of file to optimize. Moray source files end in .mry
    #[clap(parse(from_os_str))]
    path: std::path::PathBuf,

    /// Path to output file, default is <path_filename>.opt.mry
    #[clap(short, long, parse(from_os_str))]
    output: Option<std::path::PathBuf>,

    // Configuration

    /// Engine options, space separated key=value pairs.
    /// Recognized keys: max_unroll_iterations, max_nested_unrollings,
    /// inline_call_node_threshold, cone_rewriter_enabled
    #[clap(long, multiple = true)]
    set: Option<Vec<OptimizationKnob>>,

    /// Run the cone rewriter after program transformation
    #[clap(long, action)]
    cone_rewriting: bool,

    // Flags

    /// Write the residual program to stdout instead of output
    #[clap(long, action)]
    stdout: bool,

    /// Write the parsed AST as JSON to stdout and exit
    #[clap(long, action)]
    emit_ast: bool
}

impl OptimizerCLIOptions {
    /// Derives default values for empty arguments that cannot be set to constants.
    /// For instance output is derived from the input file path.
    /// @return: Returns OptimizerCLIOptions with modified empty arguments
    fn derive_defaults(mut self) -> Self {
        // Derive output file path from input file path if not set
        if self.output.is_none() {
            self.output = Some(self.path.with_extension("opt.mry"))
        }

        return self;
    }

    /// Collects the engine configuration out of the '--set' knobs and the
    /// '--cone-rewriting' shorthand.
    fn get_engine_config(&self) -> Result<TransformConfig, String> {
        let mut config = TransformConfig::default();
        if let Some(knobs) = &self.set {
            for knob in knobs {
                config.apply_knob(knob).map_err(|why| why.to_string())?;
            }
        }
        if self.cone_rewriting {
            config.cone_rewriter_enabled = true;
        }
        Ok(config)
    }
}

fn main() {
    env_logger::init();

    // Parse Command line arguments
    let cli_args = OptimizerCLIOptions::parse().derive_defaults();

    let config = match cli_args.get_engine_config() {
        Ok(config) => config,
        Err(why) => {
            println!("Invalid option: {}", why);
            std::process::exit(exitcode::USAGE);
        }
    };

    let source_path = cli_args.path.as_path();

    // AST export mode short circuits the optimization pipeline
    if cli_args.emit_ast {
        match std::fs::read_to_string(source_path) {
            Ok(source) => {
                let ast = <PARSER as AstParser>::default().parse(&source);
                println!("{}", ast.to_json());
                std::process::exit(exitcode::OK);
            }
            Err(why) => {
                println!("Read Error: {:?}", why);
                std::process::exit(exitcode::IOERR);
            }
        }
    }

    let optimizer: Optimizer<PARSER> = Optimizer::default().set_config(config);

    // Check if output should be to stdout
    let result = if cli_args.stdout {
        match optimizer.optimize(source_path) {
            Ok(residual_program) => {
                print!("{}", residual_program);
                Ok(())
            }
            Err(result) => { Err(result) }
        }
    } else {
        let dest_path = cli_args.output.unwrap(); // Can unwrap as output will always be derived
        let dest_path = dest_path.as_path();
        optimizer.optimize_and_save(source_path, dest_path)
    };

    // Check result
    match result {
        Ok(_) => {
            if !cli_args.stdout { // Don't pollute stdout if it has been selected
                println!("Optimization success!");
            }
            std::process::exit(exitcode::OK);
        },
        Err(why) => {
            println!("Optimization Error: {}", why);
            std::process::exit(exitcode::SOFTWARE);
        }
    };

}
