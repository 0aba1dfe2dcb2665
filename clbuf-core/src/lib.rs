#![forbid(unsafe_code)]
#![warn(missing_docs)]
/*!
Element types shared by **clbuf** and code that talks to it.

See [`elem`] for the sizing table of every element type.
*/

pub use bytemuck;
pub use num_traits;

pub mod elem;
pub mod scalar;
