/*
 * Copyright 2024-2025 The cask-store developers
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
use std::env;
use std::process::Command;

/// The identity recorded in a commit object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Resolve the committer identity.
///
/// The `CASK_COMMITTER_NAME` and `CASK_COMMITTER_EMAIL` environment variables
/// take precedence; otherwise the identity comes from `git config`.
///
/// # Errors
/// - `Error::Config`: No identity is configured.
pub fn resolve() -> crate::Result<Identity> {
    if let (Ok(name), Ok(email)) = (env::var("CASK_COMMITTER_NAME"), env::var("CASK_COMMITTER_EMAIL")) {
        if !name.is_empty() && !email.is_empty() {
            return Ok(Identity { name, email });
        }
    }

    let name = git_config("user.name")?;
    let email = git_config("user.email")?;
    Ok(Identity { name, email })
}

fn git_config(key: &str) -> crate::Result<String> {
    let output = Command::new("git")
        .args(["config", key])
        .output()
        .map_err(|_| {
            crate::Error::Config(String::from(
                "git executable not found; needed for committer name and email",
            ))
        })?;

    if !output.status.success() {
        return Err(crate::Error::Config(format!(
            "git {} is not set; run `git config --global {}` or set \
             CASK_COMMITTER_NAME and CASK_COMMITTER_EMAIL",
            key, key
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}
