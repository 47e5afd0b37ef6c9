//! Pipeline stages for turning Canvas week pages into a table document.
//!
//! Each submodule implements one transformation step and takes the fragment
//! by value, returning a new one; no stage keeps a reference to a tree after
//! handing it on.
//!
//! ## Data Flow
//!
//! ```text
//! page body ──▶ sanitize ──▶ inline ──▶ extract ──▶ style ──▶ images ──▶ assemble
//!  (Canvas)     (link/script) (continue   (table +   (borders)  (local     (HTML file
//!                              anchors)    note)                 files)     → DOCX)
//! ```
//!
//! 1. [`sanitize`] — drop `link` and `script` elements
//! 2. [`inline`]   — replace "continue" anchors with the page they point at;
//!    the only stage besides `images` with network I/O
//! 3. [`extract`]  — collect every table and its trailing `pre` note
//! 4. [`style`]    — inline border and header styling
//! 5. [`images`]   — download remote images, rasterise SVG
//! 6. [`assemble`] — decode residual entities, write the intermediate file,
//!    run the converter

pub mod assemble;
pub mod extract;
pub mod images;
pub mod inline;
pub mod sanitize;
pub mod style;
