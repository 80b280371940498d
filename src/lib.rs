//! Definite-length CBOR (RFC 8949) encoding into a fixed, caller-owned
//! buffer. No allocation, no recursion, bounded nesting.
#![no_std]

pub mod encode;

mod nesting;
mod outbuf;


#[cfg(test)]
mod nesting_tests;
