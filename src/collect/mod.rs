pub mod markets;
pub mod reference;
pub mod survey;

#[cfg(test)]
pub(crate) mod testing;
