//! Interface to the link-time code generator. Bitcode inputs are handed over as a batch once all
//! files have been ingested; the backend returns native objects whose symbols re-enter resolution
//! and supersede the bitcode records they came from.

use crate::error::Result;
use crate::parsing::BitcodeFile;
use crate::parsing::ObjectFile;

pub trait LtoBackend<'data> {
    /// Registers one bitcode unit for compilation.
    fn add(&mut self, file: &BitcodeFile<'data>);

    /// Compiles everything registered so far into native objects.
    fn compile(&mut self) -> Result<Vec<ObjectFile<'data>>>;
}
