//! Response record persisted to the `ResultStore` and posted to callbacks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::job::Job;

/// `"OK"` or `"ERR"` on the wire, kept as the exact literal strings callers
/// already expect rather than a differently-serializing enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERR")]
    Err,
}

impl Status {
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 { Status::Ok } else { Status::Err }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub job_id: String,
    pub script_name: String,
    pub args: Vec<String>,
    pub files: BTreeMap<String, String>,
    pub status: Status,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration_seconds: f64,
    pub qmd_out: String,
    pub exec_log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl Response {
    /// Build the echo-back fields (job_id/script_name/args/files) shared by
    /// every response kind, regardless of how the job terminated.
    pub fn from_job(job: &Job) -> ResponseBuilder {
        ResponseBuilder {
            job_id: job.job_id.clone(),
            script_name: job.script_name.clone(),
            args: job.args.clone(),
            files: job.extra_files.clone(),
        }
    }
}

/// Convenience builder so call sites don't repeat the echo-back fields.
pub struct ResponseBuilder {
    job_id: String,
    script_name: String,
    args: Vec<String>,
    files: BTreeMap<String, String>,
}

impl ResponseBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn finish(
        self,
        status_code: i32,
        start_time: Option<String>,
        end_time: Option<String>,
        duration_seconds: f64,
        qmd_out: String,
        exec_log: String,
        err: Option<String>,
    ) -> Response {
        Response {
            job_id: self.job_id,
            script_name: self.script_name,
            args: self.args,
            files: self.files,
            status: Status::from_exit_code(status_code),
            start_time,
            end_time,
            duration_seconds,
            qmd_out,
            exec_log,
            err,
        }
    }
}
