use orchard_core::model::Agent;
use std::path::Path;

pub fn slurm_agent(name: &str) -> Agent {
    let mut agent: Agent = toml::from_str(
        r#"
hostname = "login.hpc.example.org"
username = "alice"
workdir = "/scratch/alice"
dialect = "slurm"
pre_commands = ["module load singularity"]
max_walltime = 1440
max_cores = 16
max_processes = 4
max_nodes = 2
max_mem = 64
queue = "normal"
project = "plant-lab"
auth = { key = "~/.ssh/id_ed25519" }
"#,
    )
    .expect("slurm agent fixture must parse");
    agent.name = name.to_string();
    agent
}

pub fn local_agent(name: &str, workdir: &Path) -> Agent {
    let mut agent: Agent = toml::from_str(&format!(
        "hostname = \"localhost\"\nusername = \"alice\"\nworkdir = \"{}\"\ndialect = \"local\"\n",
        workdir.display()
    ))
    .expect("local agent fixture must parse");
    agent.name = name.to_string();
    agent
}

/// Input files from a shared collection, results pushed to the owner's home.
pub const FILES_WORKFLOW: &str = r#"
name: leaf-count
image: docker://computationalplantscience/leaf-count
commands: python3 /opt/count.py $INPUT -o $OUTPUT
input:
  kind: files
  path: /iplant/home/alice/leaves
  patterns: [jpg]
output:
  from: out
  to: /iplant/home/alice/results
  include:
    names: [counts.csv]
    patterns: [png]
time:
  limit: 2
  units: Hours
"#;

/// No input and no push destination: a single run job.
pub const BARE_WORKFLOW: &str = r#"
image: docker://alpine
commands: echo hello > out.txt
time:
  limit: 30
  units: Minutes
"#;
