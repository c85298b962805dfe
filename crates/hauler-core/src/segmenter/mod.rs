//! Range math and chunk planning.
//!
//! Splits one large object into fixed-size byte ranges that are fetched in
//! parallel and written at their own offsets.

mod range;

pub use range::{plan_chunks, ChunkDescriptor};
