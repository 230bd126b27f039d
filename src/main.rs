mod logging;
mod models;
mod scenario;
mod simulation;

use clap::{Arg, Command};
use logging::{LogConfig, LogOutput, init_logging, level_for_verbosity, parse_log_level};
use scenario::*;
use simulation::SimulationEngine;

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("flightops")
        .version("0.1.0")
        .about("航空作戦シミュレーション (Flight Operations)")
        .long_about("RTSの航空機運用サブシステムを時間駆動で再現します。\n\
                     飛行場の駐機スロット・滑走路の排他制御、飛行状態機械、\n\
                     飛行計画、交戦制御をシナリオに沿って実行します。")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .conflicts_with("demo")
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .action(clap::ArgAction::SetTrue)
                .help("組み込みのデモシナリオを実行")
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)")
                .long_help("ログレベルを指定します。省略時は -v の数から決まります。\n\
                           RUST_LOG 環境変数が設定されている場合はそちらが優先されます。")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .default_value("console")
                .help("ログ出力先 (console, file, both)")
        )
        .get_matches();

    println!("航空作戦シミュレーション (Flight Operations) - flightops v0.1.0");
    println!();

    let verbose_level = matches.get_count("verbose");

    let log_output = match matches
        .get_one::<String>("log-output")
        .map(|s| s.parse::<LogOutput>())
        .unwrap_or(Ok(LogOutput::Console))
    {
        Ok(output) => output,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(2);
        }
    };
    let level = matches
        .get_one::<String>("log-level")
        .map(|s| parse_log_level(s))
        .unwrap_or_else(|| level_for_verbosity(verbose_level));
    let log_config = LogConfig {
        level,
        output: log_output,
        ..LogConfig::default()
    };
    if let Err(e) = init_logging(log_config) {
        eprintln!("警告: ログの初期化に失敗しました: {}", e);
    }

    let info_only = matches.get_flag("info");
    let result = if matches.get_flag("demo") {
        ScenarioConfig::demo()
            .map_err(Into::into)
            .and_then(|scenario| process_scenario(scenario, "<demo>", info_only, verbose_level))
    } else if let Some(scenario_path) = matches.get_one::<String>("scenario") {
        run_scenario(scenario_path, info_only, verbose_level)
    } else {
        show_default_help();
        return;
    };

    match result {
        Ok(_) => {
            if verbose_level > 0 {
                println!("シナリオ実行が正常に完了しました。");
            }
        }
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    }
}

/// シナリオファイルを読み込んで実行
fn run_scenario(scenario_path: &str, info_only: bool, verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = ScenarioConfig::from_file(scenario_path)?;
    process_scenario(scenario, scenario_path, info_only, verbose_level)
}

fn process_scenario(
    scenario: ScenarioConfig,
    origin: &str,
    info_only: bool,
    verbose_level: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    if verbose_level > 0 {
        println!("シナリオ読み込み完了: {}", origin);
    }

    // 情報表示のみの場合
    if info_only {
        scenario.print_summary();
        return Ok(());
    }

    execute_scenario(scenario, verbose_level)
}

/// シナリオの実行
fn execute_scenario(scenario: ScenarioConfig, verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    scenario.print_summary();
    println!();

    if verbose_level > 0 {
        println!("シミュレーション設定:");
        println!("  時間刻み: {:.3}秒", scenario.sim.dt_s);
        println!("  最大時間: {:.1}秒", scenario.sim.t_max_s);
        println!("  シード値: {}", scenario.sim.seed);
        println!();
    }

    let mut simulation = SimulationEngine::new(scenario, verbose_level);
    simulation.initialize()?;

    let summary = simulation.run()?;
    println!();
    summary.print();

    Ok(())
}

/// デフォルトヘルプを表示
fn show_default_help() {
    println!("使用方法:");
    println!("  flightops [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>    シナリオファイルを指定して実行");
    println!("      --demo               組み込みデモシナリオを実行");
    println!("  -i, --info               シナリオ情報のみ表示");
    println!("  -v, --verbose            詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --log-level <LEVEL>  ログレベル (trace, debug, info, warn, error)");
    println!("      --log-output <OUT>   ログ出力先 (console, file, both)");
    println!("  -h, --help               このヘルプを表示");
    println!();
    println!("利用可能なシナリオファイル:");
    println!("  scenarios/demo.yaml               - 1飛行場・3機の基本シナリオ");
    println!("  scenarios/airfield_loss.yaml      - 飛行場喪失と再バインド");
    println!();
    println!("例:");
    println!("  flightops --demo");
    println!("  flightops -s scenarios/demo.yaml -v");
    println!("  flightops -s scenarios/airfield_loss.yaml --log-output both --log-level debug");
}
