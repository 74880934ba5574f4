use lazy_static::lazy_static;
use meters::Tags;
use regex::Regex;

const AMI: &str = "EC2_AMI_ID";
const APP: &str = "NETFLIX_APP";
const ASG: &str = "NETFLIX_AUTO_SCALE_GROUP";
const CLUSTER: &str = "NETFLIX_CLUSTER";
const STACK: &str = "NETFLIX_STACK";
const INSTANCE_ID: &str = "EC2_INSTANCE_ID";
const OWNER: &str = "EC2_OWNER_ID";
const REGION: &str = "EC2_REGION";
const TITUS_INSTANCE_ID: &str = "TITUS_TASK_INSTANCE_ID";
const VM_TYPE: &str = "EC2_INSTANCE_TYPE";
const ZONE: &str = "EC2_AVAILABILITY_ZONE";
const TASK_ID: &str = "TITUS_TASK_ID";

const DC_REGION: &str = "us-nflx-1";
const DC_ZONE: &str = "us-nflx-1a";

pub fn safe_getenv(var: &str) -> String {
    std::env::var(var).unwrap_or_default()
}

fn first_nonempty(values: &[String]) -> String {
    values
        .iter()
        .find(|v| !v.is_empty())
        .cloned()
        .unwrap_or_default()
}

fn hostname() -> String {
    let from_env = safe_getenv("HOSTNAME");
    if !from_env.is_empty() {
        return from_env;
    }
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_owned())
        .unwrap_or_else(|err| format!("error-{}", err.raw_os_error().unwrap_or(0)))
}

pub fn instance_id() -> String {
    let v = first_nonempty(&[safe_getenv(TITUS_INSTANCE_ID), safe_getenv(INSTANCE_ID)]);
    if v.is_empty() {
        hostname()
    } else {
        v
    }
}

pub fn account() -> String {
    first_nonempty(&[safe_getenv(OWNER), "dc".to_owned()])
}

pub fn app() -> String {
    safe_getenv(APP)
}

pub fn cluster() -> String {
    safe_getenv(CLUSTER)
}

pub fn stack() -> String {
    safe_getenv(STACK)
}

pub fn ami() -> String {
    safe_getenv(AMI)
}

pub fn asg() -> String {
    safe_getenv(ASG)
}

pub fn vmtype() -> String {
    safe_getenv(VM_TYPE)
}

pub fn taskid() -> String {
    safe_getenv(TASK_ID)
}

pub fn zone() -> String {
    first_nonempty(&[safe_getenv(ZONE), DC_ZONE.to_owned()])
}

pub fn region() -> String {
    first_nonempty(&[safe_getenv(REGION), DC_REGION.to_owned()])
}

/// Environment variables that must be present before the agent will send
/// anything, unless `forceStart` is set.
pub const REQUIRED_VARS: [&str; 4] = [
    "NETFLIX_CLUSTER",
    "EC2_OWNER_ID",
    "EC2_REGION",
    "NETFLIX_ENVIRONMENT",
];

pub fn is_sane_environment() -> bool {
    REQUIRED_VARS.iter().all(|var| std::env::var(var).is_ok())
}

/// Common tags derived from the instance environment, merged into every
/// published measurement.
pub fn default_common_tags() -> Tags {
    let mut tags = Tags::new();
    let mut put_if_nonempty = |key: &str, value: String| {
        if !value.is_empty() {
            tags.add_str(key, &value);
        }
    };
    put_if_nonempty("nf.node", instance_id());
    put_if_nonempty("nf.cluster", cluster());
    put_if_nonempty("nf.app", app());
    put_if_nonempty("nf.asg", asg());
    put_if_nonempty("nf.stack", stack());
    put_if_nonempty("nf.vmtype", vmtype());
    put_if_nonempty("nf.task", taskid());
    put_if_nonempty("nf.zone", zone());
    put_if_nonempty("nf.region", region());
    put_if_nonempty("nf.account", account());
    tags
}

lazy_static! {
    static ref VAR_PATTERN: Regex =
        Regex::new(r"\$(\w+)|\$\{([^}]+)\}").expect("variable pattern compiles");
}

/// Replace `$VAR` and `${VAR}` references using the supplied expander.
pub fn expand_vars<F>(raw: &str, expander: F) -> String
where
    F: Fn(&str) -> String,
{
    VAR_PATTERN
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let var = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or("");
            expander(var)
        })
        .into_owned()
}

/// Replace `$VAR` and `${VAR}` references with environment values; unset
/// variables expand to the empty string.
pub fn expand_env_vars(raw: &str) -> String {
    expand_vars(raw, |var| {
        let replacement = safe_getenv(var);
        tracing::trace!(var, %replacement, "expanding variable");
        replacement
    })
}
