use clap::Subcommand;
use model::job::JobType;

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or change the process configuration of a job type
    ProcessConfig {
        #[command(subcommand)]
        command: ProcessConfigCommand,
    },
    Job {
        #[command(subcommand)]
        command: JobCommand,
    },
}

#[derive(Subcommand)]
pub enum ProcessConfigCommand {
    Show {
        #[arg(long, default_value = "MIGRATION", help = "Job type, e.g. MIGRATION or CDC")]
        job_type: JobType,

        #[arg(long, help = "Print as JSON instead of YAML")]
        json: bool,
    },
    /// Merge a partial YAML document over the stored configuration
    Set {
        #[arg(long, default_value = "MIGRATION")]
        job_type: JobType,

        #[arg(long, help = "YAML file holding the partial configuration")]
        file: String,
    },
    /// Drop the stored configuration so defaults apply again
    Reset {
        #[arg(long, default_value = "MIGRATION")]
        job_type: JobType,
    },
}

#[derive(Subcommand)]
pub enum JobCommand {
    /// Print the job type encoded in a job id
    Type { job_id: String },
    /// Compute the id of a migration job
    Id {
        #[arg(
            long = "line",
            required = true,
            help = "Data node line of one sharding item, e.g. t_order:ds_0.t_order_0"
        )]
        lines: Vec<String>,

        #[arg(long, help = "Target database name")]
        database: String,
    },
}
