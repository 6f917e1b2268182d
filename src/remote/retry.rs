/*
 * Copyright 2019-2021 Wren Powell
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::thread;
use std::time::Duration;

use crate::config::RetryConfig;

/// Retry `f` on transient errors with exponential backoff and jitter.
///
/// Errors for which [`Error::is_transient`] is false are returned immediately. Once
/// `config.max_retries` retries have been made, the last transient error is returned.
///
/// [`Error::is_transient`]: crate::Error::is_transient
pub fn retry<T>(
    config: &RetryConfig,
    op_name: &str,
    target: &str,
    mut f: impl FnMut() -> crate::Result<T>,
) -> crate::Result<T> {
    let mut delay_ms = config.retry_delay_ms;
    let mut attempt = 0;

    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                tracing::warn!(
                    "{target} {op_name}: transient error (attempt {}/{}), retrying: {error}",
                    attempt,
                    config.max_retries,
                );
                let jitter = rand::random::<u64>() % delay_ms.max(1);
                thread::sleep(Duration::from_millis(delay_ms + jitter));
                delay_ms = (delay_ms * 2).min(config.retry_max_delay_ms);
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use anyhow::anyhow;

    use super::*;

    fn fast_config(max_retries: usize) -> RetryConfig {
        RetryConfig {
            max_retries,
            retry_delay_ms: 1,
            retry_max_delay_ms: 2,
        }
    }

    #[test]
    fn transient_errors_are_retried_until_success() {
        let calls = Cell::new(0);
        let result = retry(&fast_config(3), "get", "test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(crate::Error::unavailable("test", anyhow!("offline")))
            } else {
                Ok(calls.get())
            }
        });

        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let calls = Cell::new(0);
        let result: crate::Result<()> = retry(&fast_config(2), "get", "test", || {
            calls.set(calls.get() + 1);
            Err(crate::Error::unavailable("test", anyhow!("offline")))
        });

        assert!(matches!(result, Err(crate::Error::RemoteUnavailable { .. })));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: crate::Result<()> = retry(&fast_config(5), "get", "test", || {
            calls.set(calls.get() + 1);
            Err(crate::Error::WrongPassword)
        });

        assert!(matches!(result, Err(crate::Error::WrongPassword)));
        assert_eq!(calls.get(), 1);
    }
}
