use stress_test::{stress_test_crash_recovery, stress_test_registration, stress_test_scaling};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let rt = tokio::runtime::Runtime::new().unwrap();
    if let Err(e) = rt.block_on(async_main()) {
        eprintln!("\n✗ Stress run aborted: {}", e);
        std::process::exit(1);
    }
}

async fn async_main() -> stress_test::HarnessResult<()> {
    println!("Started at {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REGISTRY STRESS TESTS                            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut all_consistent = true;

    // Test 1: Concurrent registration, small scale
    let stats = stress_test_registration(4, 250).await?;
    stats.print();
    all_consistent &= stats.consistent;

    // Test 2: Repeated crashes, small scale
    let stats = stress_test_crash_recovery(20, 100).await?;
    stats.print();
    all_consistent &= stats.consistent;

    // Test 3: Concurrent registration, medium scale
    let stats = stress_test_registration(16, 1000).await?;
    stats.print();
    all_consistent &= stats.consistent;

    // Test 4: Repeated crashes, medium scale
    let stats = stress_test_crash_recovery(100, 500).await?;
    stats.print();
    all_consistent &= stats.consistent;

    // Test 5: Scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS (Registration)                   ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(16, 4).await?;

    if !all_consistent {
        return Err("registry and volume diverged after remount".into());
    }
    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}
