// External Modules
extern crate pest;
#[macro_use]
extern crate pest_derive;
extern crate safer_ffi;

use safer_ffi::prelude::*;

use optimizer::Optimizer;

// Internal Modules
pub mod optimizer;

#[cfg(test)]
mod test;

type PARSER = optimizer::PestMorayParser;

#[derive_ReprC]
#[repr(C)]
pub struct OptimizerResponse {
    code_text: char_p::Box,      // C Repr: char *
    error_text: char_p::Box      // C Repr: char *, empty on success
}

#[derive_ReprC]
#[repr(C)]
pub struct OptimizerRequest {
    code_text: char_p::Box       // C repr: char *
}

/// Public Definitions
#[ffi_export]
pub fn optimize(request: &OptimizerRequest) -> OptimizerResponse {
    let optimizer: Optimizer<PARSER> = Optimizer::default();

    match optimizer.optimize_str(request.code_text.to_str()) {
        Ok(optimized_text) => OptimizerResponse {
            code_text: optimized_text.try_into().unwrap(),
            error_text: String::new().try_into().unwrap()
        },
        Err(error) => OptimizerResponse {
            code_text: String::new().try_into().unwrap(),
            error_text: error.diagnostic().try_into().unwrap()
        }
    }
}

#[ffi_export]
pub fn free_optimize_response(response: OptimizerResponse) {
    drop(response.code_text);
    drop(response.error_text);
}


// Header generator
// To generate call:
// $ cargo test --features c-headers -- generate_headers
#[::safer_ffi::cfg_headers]
#[test]
fn generate_headers() -> ::std::io::Result<()> {
    ::safer_ffi::headers::builder()
        .to_file("include/moray_optimizer.h")?
        .generate()
}
