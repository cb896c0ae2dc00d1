pub mod analysis;
pub mod ast;
pub mod cone;
pub mod config;
pub mod error;
pub mod parser;
pub mod printer;
pub mod runtime;
pub mod transform;

use std::error::Error;
use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::Path;

// Interface Definitions
use self::parser::AstParser;

// Concrete Definitions Re-Export
pub use self::ast::Ast;
pub use self::cone::apply_cone_rewriting;
pub use self::config::{OptimizationKnob, TransformConfig};
pub use self::error::{InternalError, PassError, ProgramError};
pub use self::parser::PestMorayParser;
pub use self::printer::print_program;
pub use self::transform::{CancellationToken, ProgramTransformationPass};

/// Optimizer holds the configuration of one optimization pipeline.
/// It is typed over the AstParser being used.
///
/// # Pipeline Diagram
/// moray_code -> AstParser -> Ast -> ProgramTransformationPass -> residual Ast
///   (-> ConeRewriter, when enabled) -> pretty printer -> residual moray_code
pub struct Optimizer<P: AstParser> {
    parser: P,
    config: TransformConfig,
}

#[allow(dead_code)] // Many of the functions act as a library interface and are not used internally
impl<P: AstParser> Optimizer<P> {
    /// Default generates a default optimizer configuration, determined by
    /// the default methods of the parser and the engine knob defaults.
    pub fn default() -> Self {
        Optimizer {
            parser: P::default(),
            config: TransformConfig::default(),
        }
    }

    /// Create a new optimizer using a preconfigured parser and engine knobs.
    pub fn new(parser: P, config: TransformConfig) -> Self {
        Optimizer { parser, config }
    }

    pub fn set_config(mut self, config: TransformConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs the transformation engine (and, when enabled, the cone
    /// rewriter) over an already parsed program.
    pub fn optimize_ast(&self, ast: Ast) -> Result<Ast, PassError> {
        let mut pass = ProgramTransformationPass::new(self.config.clone());
        let ast = pass.transform(ast)?;
        if self.config.cone_rewriter_enabled {
            Ok(apply_cone_rewriting(ast))
        } else {
            Ok(ast)
        }
    }

    /// Optimizes a source string and renders the residual program back to
    /// source text.
    pub fn optimize_str(&self, source: &str) -> Result<String, PassError> {
        let ast = self.parser.parse(source);
        let ast = self.optimize_ast(ast)?;
        Ok(print_program(ast.root()))
    }

    /// Optimizes a program file.
    /// @return: residual source if Ok. Otherwise IO Error from a failed read
    /// or the pass diagnostic.
    pub fn optimize(&self, source_filename: &Path) -> Result<String, Box<dyn Error>> {
        let source_str = fs::read_to_string(source_filename)?;
        Ok(self.optimize_str(source_str.as_str())?)
    }

    /// Optimizes a program file and writes the residual program into the
    /// destination file path.
    pub fn optimize_and_save(&self, source_filename: &Path, dest_filename: &Path) -> Result<(), Box<dyn Error>> {
        let optimized_str = self.optimize(source_filename)?;

        let display_dest = dest_filename.display();

        let mut file = match File::create(dest_filename) {
            Err(why) => panic!("Couldn't create {}: {}", display_dest, why),
            Ok(file) => file,
        };

        match file.write_all(optimized_str.as_bytes()) {
            Err(why) => panic!("Couldn't write to {}: {}", display_dest, why),
            Ok(_) => println!("Successfully wrote to {}", display_dest),
        };

        Ok(())
    }
}
