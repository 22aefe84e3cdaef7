mod local;
mod ops;

use ccepolicy_core::OutputFormat;
use clap::{Parser, Subcommand};
use ops::{
    diff_policy, generate_fragment, generate_import, generate_policy, ui, validate_sidecar,
    Context, ContextArgs, DiffArgs, FragmentArgs, GenerateArgs, ImportArgs, Outcome,
    ReportFormat, SigningArgs,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Compile container group descriptions into confidential-container security policies.
#[derive(Parser)]
#[command(
    name = "ccepolicy",
    author,
    version,
    about = "Security policy compiler for confidential containers"
)]
struct Cli {
    /// 调试模式：允许 shell 访问与标准输入输出
    #[arg(long, env = "CCEPOLICY_DEBUG_MODE", default_value_t = false)]
    debug_mode: bool,

    /// Baseline sidecar table (JSON), replaces the built-in table
    #[arg(long, env = "CCEPOLICY_SIDECARS")]
    sidecars: Option<PathBuf>,

    /// Image -> layer hashes map (JSON)
    #[arg(long, env = "CCEPOLICY_LAYERS")]
    layers: Option<PathBuf>,

    /// Fragment store index (JSON); enables fragment resolution
    #[arg(long, env = "CCEPOLICY_FRAGMENT_STORE")]
    fragment_store: Option<PathBuf>,

    /// COSE signing tool
    #[arg(long, env = "CCEPOLICY_SIGN_TOOL", default_value = "sign1util")]
    sign_tool: PathBuf,

    /// oras CLI used to push fragments
    #[arg(long, env = "CCEPOLICY_ORAS", default_value = "oras")]
    oras: PathBuf,

    /// Report format
    #[arg(long, value_enum, default_value = "table")]
    output: ReportFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 生成容器组策略
    Generate {
        /// 输入文件
        #[arg(long, short)]
        input: PathBuf,
        /// 输出紧凑 JSON 容器数组
        #[arg(long, conflicts_with = "outraw_pretty_print")]
        outraw: bool,
        /// 输出缩进 JSON 容器数组
        #[arg(long)]
        outraw_pretty_print: bool,
        /// 省略容器 id
        #[arg(long)]
        omit_id: bool,
        /// 覆盖基础设施片段的最小 SVN
        #[arg(long)]
        infrastructure_svn: Option<u64>,
        /// 保存到文件而不是打印
        #[arg(long)]
        save_to_file: Option<PathBuf>,
        /// 部署模板
        #[arg(long, requires = "inject")]
        template: Option<PathBuf>,
        /// 把策略写入模板
        #[arg(long, requires = "template")]
        inject: bool,
        /// 模板中第几个容器组
        #[arg(long, default_value_t = 0)]
        group: usize,
    },
    /// 生成策略片段，可选签名并推送
    Fragment {
        #[arg(long, short)]
        input: PathBuf,
        /// 片段的 package 名
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        svn: u64,
        #[arg(long)]
        omit_id: bool,
        /// 片段文件路径，默认 <namespace>.rego
        #[arg(long)]
        out: Option<PathBuf>,
        /// 签名私钥
        #[arg(long, requires_all = ["chain", "feed"])]
        key: Option<PathBuf>,
        /// 证书链
        #[arg(long, requires = "key")]
        chain: Option<PathBuf>,
        /// 发布 feed
        #[arg(long, requires = "key")]
        feed: Option<String>,
        #[arg(long, default_value = "ES384")]
        algorithm: String,
        /// 签名后推送到镜像仓库
        #[arg(long, requires = "key")]
        push: bool,
    },
    /// 为片段生成导入声明
    Import {
        /// 片段文件
        #[arg(long)]
        fragment: PathBuf,
        #[arg(long)]
        feed: String,
        /// 证书链
        #[arg(long)]
        chain: PathBuf,
        /// 默认使用片段声明的 svn
        #[arg(long)]
        minimum_svn: Option<u64>,
        /// 追加到导入列表文件
        #[arg(long)]
        fragments_json: Option<PathBuf>,
    },
    /// 校验 sidecar 是否符合基线
    ValidateSidecar {
        #[arg(long, short)]
        input: PathBuf,
        #[arg(long)]
        pretty: bool,
    },
    /// 比较已部署策略与重新生成的策略
    Diff {
        #[arg(long, short)]
        input: PathBuf,
        /// 包含已部署策略的模板
        #[arg(long)]
        existing: PathBuf,
        #[arg(long, default_value_t = 0)]
        group: usize,
        #[arg(long)]
        pretty: bool,
    },
}

fn main() -> ExitCode {
    // 加载 .env 文件（如果存在），忽略错误
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(Outcome::Clean) => ExitCode::SUCCESS,
        Ok(Outcome::Findings) => ExitCode::from(2),
        Err(e) => {
            ui::print_error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<Outcome> {
    let ctx = Context::load(ContextArgs {
        debug_mode: cli.debug_mode,
        sidecars: cli.sidecars.as_deref(),
        layers: cli.layers.as_deref(),
        fragment_store: cli.fragment_store.as_deref(),
        sign_tool: &cli.sign_tool,
        oras: &cli.oras,
    })?;

    match cli.command {
        Commands::Generate {
            input,
            outraw,
            outraw_pretty_print,
            omit_id,
            infrastructure_svn,
            save_to_file,
            template,
            inject,
            group,
        } => {
            let format = if outraw_pretty_print {
                OutputFormat::PrettyPrint
            } else if outraw {
                OutputFormat::Raw
            } else {
                OutputFormat::Default
            };
            let inject = template
                .as_deref()
                .filter(|_| inject)
                .map(|path| (path, group));
            generate_policy(
                &ctx,
                GenerateArgs {
                    input: &input,
                    format,
                    omit_id,
                    infrastructure_svn,
                    save_to_file: save_to_file.as_deref(),
                    inject,
                },
            )?;
            Ok(Outcome::Clean)
        }
        Commands::Fragment {
            input,
            namespace,
            svn,
            omit_id,
            out,
            key,
            chain,
            feed,
            algorithm,
            push,
        } => {
            let signing = match (&key, &chain, &feed) {
                (Some(key), Some(chain), Some(feed)) => Some(SigningArgs {
                    key,
                    chain,
                    feed,
                    algorithm: &algorithm,
                    push,
                }),
                (None, None, None) => None,
                _ => anyhow::bail!("signing needs --key, --chain and --feed together"),
            };
            generate_fragment(
                &ctx,
                FragmentArgs {
                    input: &input,
                    namespace: &namespace,
                    svn,
                    omit_id,
                    output: out.as_deref(),
                    signing,
                },
                cli.output,
            )?;
            Ok(Outcome::Clean)
        }
        Commands::Import {
            fragment,
            feed,
            chain,
            minimum_svn,
            fragments_json,
        } => {
            generate_import(
                &ctx,
                ImportArgs {
                    fragment: &fragment,
                    feed: &feed,
                    chain: &chain,
                    minimum_svn,
                    fragments_json: fragments_json.as_deref(),
                },
            )?;
            Ok(Outcome::Clean)
        }
        Commands::ValidateSidecar { input, pretty } => {
            validate_sidecar(&ctx, &input, pretty, cli.output)
        }
        Commands::Diff {
            input,
            existing,
            group,
            pretty,
        } => diff_policy(
            &ctx,
            DiffArgs {
                input: &input,
                existing: &existing,
                group,
                pretty,
            },
            cli.output,
        ),
    }
}

/// Logs go to stderr; stdout carries policies and reports.
fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_parses() {
        let args = ["ccepolicy", "generate", "--input", "input.json", "--outraw"];
        let cli = Cli::parse_from(args);
        assert!(matches!(
            cli.command,
            Commands::Generate { outraw: true, .. }
        ));
    }

    #[test]
    fn raw_flags_conflict() {
        let args = [
            "ccepolicy",
            "generate",
            "-i",
            "input.json",
            "--outraw",
            "--outraw-pretty-print",
        ];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn inject_requires_template() {
        let args = ["ccepolicy", "generate", "-i", "input.json", "--inject"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn check_commands_parse() {
        let cli = Cli::parse_from(["ccepolicy", "--output", "json", "validate-sidecar", "-i", "in.json"]);
        assert_eq!(cli.output, ReportFormat::Json);
        let cli = Cli::parse_from(["ccepolicy", "diff", "-i", "in.json", "--existing", "t.json"]);
        assert!(matches!(cli.command, Commands::Diff { group: 0, .. }));
    }
}
