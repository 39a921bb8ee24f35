//! Embedded OpenCL C sources.
//!
//! The probe normally reads its kernel from disk so operators can swap in a
//! different test module. The copy embedded here backs `--simulate` runs and
//! the tests.

/// Contents of `kernels/cl_minimal.cl`: an empty `test` entry point.
pub const CL_MINIMAL_SOURCE: &str = include_str!("../kernels/cl_minimal.cl");
