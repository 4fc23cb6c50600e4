//! The entitlement facade: "can this org use this feature right now?"
//!
//! Policy: the provider being unreachable must not cause a correct
//! application to deny service, so lookup failures fail *open* — the
//! answer is yes, with the error exposed for callers who want strict
//! semantics.

use chrono::Utc;

use super::{Client, usage::Report};
use crate::error::{Error, Result};
use crate::refs::Name;

/// The answer to an entitlement question.
///
/// Use it short-form:
///
/// ```rust,no_run
/// # async fn demo(client: &tier_control::control::Client) -> tier_control::error::Result<()> {
/// let feature: tier_control::refs::Name = "feature:convert".parse()?;
/// if client.can("org:acme", &feature).await.ok() {
///     // proceed
/// }
/// # Ok(())
/// # }
/// ```
///
/// or keep it around to report consumption after the work is done:
///
/// ```rust,no_run
/// # async fn demo(client: &tier_control::control::Client) -> tier_control::error::Result<()> {
/// let feature: tier_control::refs::Name = "feature:convert".parse()?;
/// let answer = client.can("org:acme", &feature).await;
/// if !answer.ok() {
///     return Ok(());
/// }
/// // ... do the work ...
/// answer.report().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Answer<'a> {
    ok: bool,
    err: Option<Error>,
    reporter: Option<Reporter<'a>>,
}

#[derive(Debug)]
struct Reporter<'a> {
    client: &'a Client,
    org: String,
    feature: Name,
}

impl Answer<'_> {
    /// Whether the program should proceed.
    ///
    /// Fails optimistically: when the limits lookup itself failed this is
    /// `true`; check [`Answer::err`] to invert that policy.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.ok
    }

    /// The error from the limits lookup, if one occurred.
    #[must_use]
    pub fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// Reports one unit of usage; shorthand for `report_n(1)`.
    ///
    /// # Errors
    ///
    /// Same as [`Answer::report_n`].
    pub async fn report(&self) -> Result<()> {
        self.report_n(1).await
    }

    /// Reports `n` units of usage for the feature and org the question was
    /// asked about. A no-op when the answer carries no reporter (denied,
    /// or failed open).
    ///
    /// # Errors
    ///
    /// Same as [`Client::report_usage`].
    pub async fn report_n(&self, n: i64) -> Result<()> {
        match &self.reporter {
            Some(r) => {
                r.client
                    .report_usage(&r.org, &r.feature, Report::increment(n, Utc::now()))
                    .await
            }
            None => Ok(()),
        }
    }
}

impl Client {
    /// Answers whether `org` is entitled to use `feature` right now.
    ///
    /// Consults the current usage and limit; at or past the limit the
    /// answer is no. Lookup failures fail open with the error attached.
    pub async fn can(&self, org: &str, feature: &Name) -> Answer<'_> {
        match self.lookup_limit(org, feature).await {
            Err(err) => Answer { ok: true, err: Some(err), reporter: None },
            Ok((limit, used)) => {
                if used >= limit {
                    Answer { ok: false, err: None, reporter: None }
                } else {
                    Answer {
                        ok: true,
                        err: None,
                        reporter: Some(Reporter {
                            client: self,
                            org: org.to_owned(),
                            feature: feature.clone(),
                        }),
                    }
                }
            }
        }
    }
}
