//! # construct-scan
//!
//! Static construct inventory for Java and Python artifacts. Every package,
//! type and callable found in source files, class files and archives gets a
//! canonical, comparable identifier and its body text.
//!
//! ## Architecture
//!
//! - **construct**: Construct identifiers, qualified names and parameter normalization
//! - **resolver**: Context stack and naming counters for nested declarations
//! - **java_source**: tree-sitter walk of `.java` files feeding the resolver
//! - **classfile**: Class-file reader for `.class` files
//! - **python**: Grammar selection and tree-sitter walk of `.py` files
//! - **analyzer**: File and archive analyzer traits, memoization and cancellation
//! - **library**: Library coordinates read from Maven and Python metadata
//! - **catalog**: Archive entry classification
//! - **probe**: Memory-mapped zip access, marker probes and extraction
//! - **scan**: Parallel directory walks for archives and class trees
//! - **digest**: SHA-256 digests over packaged bytes
//! - **jar**, **war**, **aar**, **pyarchive**: Archive analyzers
//! - **orchestrator**: Bounded worker pool with timeout and cancellation
//! - **config**: Analysis configuration threaded through every analyzer

pub mod aar;
pub mod analyzer;
pub mod catalog;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod construct;
pub mod digest;
pub mod error;
pub mod jar;
pub mod java_source;
pub mod library;
pub mod orchestrator;
pub mod probe;
pub mod pyarchive;
pub mod python;
pub mod resolver;
pub mod scan;
pub mod war;
