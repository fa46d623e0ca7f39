//! Property 5: the risk score is monotonic in exposure and volatility
//! when the other inputs are held constant.

use snipebot::application::risk_manager::{RiskConfig, RiskManager};
use snipebot::infrastructure::event_bus::EventBus;

fn manager() -> RiskManager {
    RiskManager::new(RiskConfig::default(), EventBus::new())
}

#[tokio::test]
async fn test_score_nondecreasing_in_exposure() {
    let mut previous = -1.0;
    for exposure in [100.0, 250.0, 400.0, 550.0, 700.0, 850.0, 1000.0] {
        let rm = manager();
        rm.set_min_pool_liquidity(10_000.0);
        rm.set_exposure("T1", exposure);
        let score = rm.assess().risk_score;
        assert!(
            score >= previous,
            "score {score} dropped below {previous} at exposure {exposure}"
        );
        previous = score;
    }
}

#[tokio::test]
async fn test_score_nondecreasing_in_volatility() {
    // Each step widens the price swings while exposure and liquidity stay
    // fixed.
    let amplitudes = [0.01, 0.05, 0.10, 0.20, 0.40];
    let mut previous = -1.0;
    for amplitude in amplitudes {
        let rm = manager();
        rm.set_min_pool_liquidity(10_000.0);
        rm.set_exposure("T1", 300.0);
        for i in 0..20 {
            let direction = if i % 2 == 0 { 1.0 } else { -1.0 };
            rm.record_price("T1", 1.0 + amplitude * direction);
        }
        let score = rm.assess().risk_score;
        assert!(
            score >= previous,
            "score {score} dropped below {previous} at amplitude {amplitude}"
        );
        previous = score;
    }
}

#[tokio::test]
async fn test_liquidity_lowers_risk() {
    let thin = manager();
    thin.set_exposure("T1", 300.0);
    thin.set_min_pool_liquidity(500.0);
    let thin_score = thin.assess().risk_score;

    let deep = manager();
    deep.set_exposure("T1", 300.0);
    deep.set_min_pool_liquidity(10_000.0);
    let deep_score = deep.assess().risk_score;

    assert!(thin_score > deep_score);
}
