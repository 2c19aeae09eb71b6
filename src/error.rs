use thiserror::Error;

use crate::method::MethodId;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Only conditions caused by *external* input are reported through this enum: raw instruction
/// arrays, exception tables and debug lists handed over by the container layer can be arbitrarily
/// broken, and ballooning rejects them with a descriptive [`Error::Malformed`]. Structural damage
/// done to an already-ballooned sequence by an optimization pass is a bug in that pass, not a
/// runtime condition, and is handled by fatal assertions instead (see the `# Panics` sections on
/// [`crate::ir::MethodTransform::sync`] and friends).
///
/// # Examples
///
/// ```rust
/// use dexscope::{Error, ir::MethodTransform, method::{Method, MethodId}};
///
/// let method = Method::new(MethodId::new(0x0001), "stub", None);
/// match MethodTransform::get(&method, false) {
///     Ok(_) => println!("ballooned"),
///     Err(Error::NoBody(id)) => println!("method {id} has no code to transform"),
///     Err(Error::Malformed { message, file, line }) => {
///         println!("bad input: {} ({}:{})", message, file, line);
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The raw method input is damaged and could not be ballooned.
    ///
    /// Covers branch targets that do not land on an instruction boundary, switch instructions
    /// whose payload is missing or of the wrong kind, exception regions that extend past the end
    /// of the code, and handler addresses that point into the middle of an instruction. The error
    /// includes the source location where the malformation was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The method has no body to transform.
    ///
    /// Abstract and native methods carry no instruction array; requesting a transform for one is
    /// reported rather than asserted because whether a method is concrete is a property of the
    /// input, not of the calling pass.
    ///
    /// The associated [`MethodId`] identifies the bodyless method.
    #[error("Method has no body to transform - {0}")]
    NoBody(MethodId),
}
