//! Result type alias for labelbridge

use super::errors::BridgeError;

/// Result type alias for labelbridge operations
///
/// # Examples
///
/// ```
/// use labelbridge::domain::result::Result;
/// use labelbridge::domain::errors::BridgeError;
///
/// fn example_function() -> Result<String> {
///     Ok("success".to_string())
/// }
///
/// fn failing_function() -> Result<()> {
///     Err(BridgeError::Validation("Invalid input".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, BridgeError>;
