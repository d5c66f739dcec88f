use thiserror::Error;

/// Builds an [`Error::Malformed`] carrying the source location of the check.
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
/// Invariant violations inside individual passes are optimizer bugs and are
/// checked with debug assertions; the variants below cover failures a caller
/// can react to, usually by falling back to a non-compiled execution strategy
/// for the affected function.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::Malformed`] - The input CFG violates a structural precondition
/// - [`Error::InvalidIr`] - A verification pass found a broken invariant
/// - [`Error::SsaError`] - SSA construction could not complete
///
/// ## Backend Errors
/// - [`Error::Unsupported`] - The backend cannot lower an IR shape
/// - [`Error::CodeBuffer`] - Code emission or patching failed
/// - [`Error::Execution`] - The executor met malformed bytecode
///
/// # Examples
///
/// ```rust
/// use ssajit::{compile_function, Config, Error, ir::{Expr, FunctionBuilder}};
///
/// let mut b = FunctionBuilder::new("f");
/// b.switch_to(b.entry());
/// b.ret(Expr::int(1));
/// match compile_function(b.finish()?, &Config::default()) {
///     Ok(compiled) => println!("{} bytes", compiled.code_size()),
///     Err(Error::Unsupported(what)) => eprintln!("falling back: {what}"),
///     Err(e) => eprintln!("compilation failed: {e}"),
/// }
/// # Ok::<(), ssajit::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input function is structurally invalid.
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

    /// A CFG, phi or dominator invariant does not hold.
    ///
    /// Raised by the `verify_*` family, which the pipeline runs after every
    /// mutating stage in debug builds.
    #[error("Invalid IR: {0}")]
    InvalidIr(String),

    /// SSA construction or the SSA well-formedness check failed.
    #[error("SSA error: {0}")]
    SsaError(String),

    /// The function uses an operator or type combination the backend cannot lower.
    ///
    /// Reported by the pre-check before any code is emitted, so the caller can
    /// run the function through another execution strategy.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Code emission failed, e.g. a jump displacement out of range or an unbound label.
    #[error("Code buffer error: {0}")]
    CodeBuffer(String),

    /// The executor decoded an invalid instruction or operand.
    #[error("Execution error: {0}")]
    Execution(String),
}
