//! PID controller - tuning, anti-windup clamping and the tick gate

use crate::clock::{Clock, MonotonicClock};
use crate::config::{resolve_interval_ms, PidOptions};
use crate::error::{PidError, Result};
use crate::observer::{OutputBus, SubscriptionId};
use crossbeam::channel::Receiver;
use std::time::Duration;
use tracing::{debug, trace, warn};

// ============================================================================
// PID CONTROLLER - Proportional-Integral-Derivative control
// ============================================================================

/// Discrete PID controller sampled every `dt` milliseconds.
///
/// The integral term is accumulated with gains pre-scaled to the interval and
/// clamped to the output bounds on every tick (anti-windup). The derivative
/// acts on the measured input, not the error, so setpoint steps do not kick
/// the output.
///
/// [`compute`](Self::compute) may be called more often than `dt`; calls made
/// before the interval has elapsed are skipped without side effects.
#[derive(Debug)]
pub struct PidController<C: Clock = MonotonicClock> {
    // Gains as configured
    kp: f64,
    ki: f64,
    kd: f64,

    // Gains rescaled to the interval
    ki_effective: f64,
    kd_effective: f64,
    dt_ms: u64,

    input: f64,
    target: f64,
    lower_bound: Option<f64>,
    upper_bound: Option<f64>,

    // Tick state
    integral: f64,
    last_input: f64,
    last_tick: Option<Duration>,
    output: f64,

    clock: C,
    observers: OutputBus,
}

impl PidController<MonotonicClock> {
    pub fn new(options: PidOptions) -> Result<Self> {
        Self::with_clock(options, MonotonicClock::new())
    }
}

impl<C: Clock> PidController<C> {
    /// Builds a controller that reads time from `clock`.
    ///
    /// Fails only when the configured bounds are inverted or NaN. The
    /// controller starts primed, so the first [`compute`](Self::compute)
    /// runs immediately with a zero derivative.
    pub fn with_clock(options: PidOptions, clock: C) -> Result<Self> {
        check_bounds(options.l_bound, options.u_bound)?;

        let mut pid = Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            ki_effective: 0.0,
            kd_effective: 0.0,
            dt_ms: resolve_interval_ms(options.dt),
            input: coerce_signal("initial", options.initial),
            target: coerce_signal("target", options.target),
            lower_bound: options.l_bound,
            upper_bound: options.u_bound,
            integral: 0.0,
            last_input: 0.0,
            last_tick: None,
            output: 0.0,
            clock,
            observers: OutputBus::new(),
        };
        pid.set_tuning(options.kp, options.ki, options.kd);
        pid.reset();
        Ok(pid)
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    /// Stores the gains. Negative or non-finite gains become 0.
    pub fn set_tuning(&mut self, kp: f64, ki: f64, kd: f64) {
        self.kp = coerce_gain("kp", kp);
        self.ki = coerce_gain("ki", ki);
        self.kd = coerce_gain("kd", kd);
        self.rescale();
        debug!(kp = self.kp, ki = self.ki, kd = self.kd, "tuning updated");
    }

    /// Sets the sample interval. Non-positive values resolve to the 500 ms default.
    pub fn set_time_interval(&mut self, ms: i64) {
        if ms <= 0 {
            warn!(requested = ms, "non-positive interval, using default");
        }
        self.dt_ms = resolve_interval_ms(Some(ms));
        self.rescale();
        debug!(dt_ms = self.dt_ms, "interval updated");
    }

    pub fn set_input(&mut self, input: f64) {
        self.input = coerce_signal("input", input);
    }

    pub fn set_target(&mut self, target: f64) {
        self.target = coerce_signal("target", target);
    }

    /// Rejects a value that would sit below the lower bound.
    pub fn set_upper_bound(&mut self, upper: f64) -> Result<()> {
        check_bounds(self.lower_bound, Some(upper))?;
        self.upper_bound = Some(upper);
        Ok(())
    }

    /// Rejects a value that would sit above the upper bound.
    pub fn set_lower_bound(&mut self, lower: f64) -> Result<()> {
        check_bounds(Some(lower), self.upper_bound)?;
        self.lower_bound = Some(lower);
        Ok(())
    }

    pub fn set_bounds(&mut self, lower: f64, upper: f64) -> Result<()> {
        check_bounds(Some(lower), Some(upper))?;
        self.lower_bound = Some(lower);
        self.upper_bound = Some(upper);
        Ok(())
    }

    pub fn clear_bounds(&mut self) {
        self.lower_bound = None;
        self.upper_bound = None;
    }

    /// Clears the integral and primes the tick state so the next
    /// [`compute`](Self::compute) runs immediately with a zero derivative.
    /// Tuning and bounds are kept.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_input = self.input;
        self.last_tick = self.clock.now().checked_sub(self.dt());
    }

    // ------------------------------------------------------------------------
    // Computation
    // ------------------------------------------------------------------------

    /// Runs one tick if at least `dt` has elapsed since the previous one.
    ///
    /// Returns the new output, or `None` if the tick was skipped. Skipped
    /// ticks change nothing and notify nobody.
    pub fn compute(&mut self) -> Option<f64> {
        let now = self.clock.now();
        if let Some(last) = self.last_tick {
            if now.saturating_sub(last) < self.dt() {
                return None;
            }
        }

        let error = self.target - self.input;

        self.integral = self.clamp(self.integral + self.ki_effective * error);
        let derivative = self.kd_effective * (self.input - self.last_input);
        self.output = self.clamp(self.kp * error + self.integral - derivative);

        self.last_input = self.input;
        self.last_tick = Some(now);

        trace!(
            error,
            integral = self.integral,
            derivative,
            output = self.output,
            "tick"
        );

        self.observers.emit(self.output);
        Some(self.output)
    }

    /// Time left before the next [`compute`](Self::compute) call will run.
    pub fn time_until_next_tick(&self) -> Duration {
        match self.last_tick {
            Some(last) => (last + self.dt()).saturating_sub(self.clock.now()),
            None => Duration::ZERO,
        }
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Registers a callback invoked synchronously with every computed output.
    ///
    /// When the controller sits behind a [`SharedController`](crate::SharedController),
    /// callbacks run while the loop holds its lock. A callback must not lock
    /// that controller again (for example to feed the output back with
    /// `set_input`); it would deadlock the loop. Use
    /// [`output_channel`](Self::output_channel) and do the feedback from the
    /// receiving side instead.
    pub fn on_output<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(f64) + Send + 'static,
    {
        self.observers.subscribe(callback)
    }

    /// Subscribes through a channel, for consumers that do slow work.
    pub fn output_channel(&mut self) -> (SubscriptionId, Receiver<f64>) {
        self.observers.subscribe_channel()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn kp(&self) -> f64 {
        self.kp
    }

    pub fn ki(&self) -> f64 {
        self.ki
    }

    pub fn kd(&self) -> f64 {
        self.kd
    }

    pub fn ki_effective(&self) -> f64 {
        self.ki_effective
    }

    pub fn kd_effective(&self) -> f64 {
        self.kd_effective
    }

    pub fn dt_ms(&self) -> u64 {
        self.dt_ms
    }

    pub fn dt(&self) -> Duration {
        Duration::from_millis(self.dt_ms)
    }

    pub fn input(&self) -> f64 {
        self.input
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn lower_bound(&self) -> Option<f64> {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> Option<f64> {
        self.upper_bound
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn last_input(&self) -> f64 {
        self.last_input
    }

    pub fn output(&self) -> f64 {
        self.output
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn rescale(&mut self) {
        let dt_secs = self.dt_ms as f64 / 1000.0;
        self.ki_effective = self.ki * dt_secs;
        self.kd_effective = self.kd / dt_secs;
    }

    fn clamp(&self, value: f64) -> f64 {
        let mut value = value;
        if let Some(upper) = self.upper_bound {
            value = value.min(upper);
        }
        if let Some(lower) = self.lower_bound {
            value = value.max(lower);
        }
        value
    }
}

fn coerce_gain(name: &str, gain: f64) -> f64 {
    if gain.is_finite() && gain >= 0.0 {
        gain
    } else {
        warn!(gain = name, value = gain, "invalid gain, using 0");
        0.0
    }
}

fn coerce_signal(name: &str, value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        warn!(signal = name, value, "non-finite value, using 0");
        0.0
    }
}

fn check_bounds(lower: Option<f64>, upper: Option<f64>) -> Result<()> {
    let invalid = match (lower, upper) {
        (Some(l), Some(u)) => l.is_nan() || u.is_nan() || l > u,
        (Some(b), None) | (None, Some(b)) => b.is_nan(),
        (None, None) => false,
    };
    if invalid {
        return Err(PidError::InvalidBounds {
            lower: lower.unwrap_or(f64::NEG_INFINITY),
            upper: upper.unwrap_or(f64::INFINITY),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use approx::assert_relative_eq;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn manual(options: PidOptions) -> (PidController<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        clock.advance_ms(10_000);
        let pid = PidController::with_clock(options, clock.clone()).unwrap();
        (pid, clock)
    }

    fn demo_options() -> PidOptions {
        PidOptions::default()
            .with_tuning(0.5, 0.05, 0.1)
            .with_interval_ms(300)
            .with_initial(0.0)
            .with_target(100.0)
            .with_bounds(-30.0, 30.0)
    }

    #[test]
    fn tuning_keeps_non_negative_gains() {
        let (mut pid, _) = manual(PidOptions::default());
        pid.set_tuning(1.5, 0.25, 0.0);
        assert_eq!((pid.kp(), pid.ki(), pid.kd()), (1.5, 0.25, 0.0));
    }

    #[test]
    fn tuning_coerces_invalid_gains_to_zero() {
        let (mut pid, _) = manual(PidOptions::default());
        pid.set_tuning(-1.0, f64::NAN, f64::INFINITY);
        assert_eq!((pid.kp(), pid.ki(), pid.kd()), (0.0, 0.0, 0.0));
        assert_eq!(pid.ki_effective(), 0.0);
        assert_eq!(pid.kd_effective(), 0.0);
    }

    #[test]
    fn interval_defaults_to_500ms() {
        let (pid, _) = manual(PidOptions::default());
        assert_eq!(pid.dt_ms(), 500);

        let (mut pid, _) = manual(PidOptions::default().with_interval_ms(-5));
        assert_eq!(pid.dt_ms(), 500);

        pid.set_time_interval(0);
        assert_eq!(pid.dt_ms(), 500);
    }

    #[test]
    fn interval_change_rescales_gains() {
        let (mut pid, _) = manual(PidOptions::default().with_tuning(1.0, 2.0, 3.0));
        assert_relative_eq!(pid.ki_effective(), 1.0);
        assert_relative_eq!(pid.kd_effective(), 6.0);

        pid.set_time_interval(100);
        assert_relative_eq!(pid.ki_effective(), 0.2);
        assert_relative_eq!(pid.kd_effective(), 30.0);
    }

    #[test]
    fn first_tick_saturates_at_upper_bound() {
        let (mut pid, _) = manual(demo_options());

        let output = pid.compute().expect("first tick should run immediately");

        assert_relative_eq!(pid.integral(), 1.5, epsilon = 1e-12);
        assert_eq!(output, 30.0);
        assert_eq!(pid.output(), 30.0);
    }

    #[test]
    fn unset_bounds_leave_output_unclamped() {
        let mut options = demo_options();
        options.l_bound = None;
        options.u_bound = None;
        let (mut pid, _) = manual(options);

        let output = pid.compute().unwrap();
        assert_relative_eq!(output, 51.5, epsilon = 1e-12);
    }

    #[test]
    fn ticks_within_interval_are_skipped() {
        let (mut pid, clock) = manual(demo_options());
        let notified = Arc::new(Mutex::new(0));
        let counter = notified.clone();
        pid.on_output(move |_| *counter.lock() += 1);

        assert!(pid.compute().is_some());
        let integral = pid.integral();

        clock.advance_ms(299);
        pid.set_input(10.0);
        assert_eq!(pid.compute(), None, "tick before dt elapsed must be skipped");
        assert_eq!(pid.integral(), integral);
        assert_eq!(pid.last_input(), 0.0);
        assert_eq!(*notified.lock(), 1);

        clock.advance_ms(1);
        assert!(pid.compute().is_some());
        assert_eq!(*notified.lock(), 2);
    }

    #[test]
    fn time_until_next_tick_tracks_the_gate() {
        let (mut pid, clock) = manual(demo_options());
        assert_eq!(pid.time_until_next_tick(), Duration::ZERO);

        pid.compute();
        assert_eq!(pid.time_until_next_tick(), Duration::from_millis(300));

        clock.advance_ms(120);
        assert_eq!(pid.time_until_next_tick(), Duration::from_millis(180));

        clock.advance_ms(500);
        assert_eq!(pid.time_until_next_tick(), Duration::ZERO);
    }

    #[test]
    fn output_and_integral_stay_within_bounds() {
        let (mut pid, clock) = manual(
            PidOptions::default()
                .with_tuning(2.0, 5.0, 0.5)
                .with_interval_ms(50)
                .with_bounds(-4.0, 7.0),
        );

        let inputs = [0.0, 50.0, -80.0, 3.0, 3.0, 120.0, -1.0, 0.5];
        let targets = [10.0, -10.0, 200.0, 3.0, -300.0, 0.0, 1.0, 0.5];
        for (input, target) in inputs.iter().zip(targets.iter()) {
            pid.set_input(*input);
            pid.set_target(*target);
            clock.advance_ms(50);
            pid.compute().unwrap();

            assert!((-4.0..=7.0).contains(&pid.output()), "output {}", pid.output());
            assert!((-4.0..=7.0).contains(&pid.integral()), "integral {}", pid.integral());
        }
    }

    #[test]
    fn integral_saturates_without_windup() {
        let (mut pid, clock) = manual(
            PidOptions::default()
                .with_tuning(0.0, 10.0, 0.0)
                .with_interval_ms(100)
                .with_target(1000.0)
                .with_bounds(-5.0, 5.0),
        );

        for _ in 0..200 {
            pid.compute().unwrap();
            assert!(pid.integral() <= 5.0);
            clock.advance_ms(100);
        }
        assert_eq!(pid.integral(), 5.0);

        // Recovers as soon as the error flips, instead of unwinding a huge sum
        pid.set_target(-1000.0);
        pid.compute().unwrap();
        assert!(pid.integral() < 5.0);
    }

    #[test]
    fn zero_error_holds_zero_output() {
        let (mut pid, clock) = manual(
            PidOptions::default()
                .with_tuning(3.0, 1.0, 0.0)
                .with_interval_ms(100)
                .with_initial(42.0)
                .with_target(42.0),
        );

        for _ in 0..20 {
            assert_eq!(pid.compute(), Some(0.0));
            clock.advance_ms(100);
        }
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn derivative_acts_on_measurement_not_setpoint() {
        let (mut pid, clock) = manual(
            PidOptions::default()
                .with_tuning(0.0, 0.0, 1.0)
                .with_interval_ms(100),
        );

        pid.compute().unwrap();
        clock.advance_ms(100);
        pid.set_target(500.0);
        assert_eq!(pid.compute(), Some(0.0), "setpoint step must not kick the output");

        clock.advance_ms(100);
        pid.set_input(2.0);
        assert_relative_eq!(pid.compute().unwrap(), -20.0);
    }

    #[test]
    fn reset_clears_integral_and_derivative_history() {
        let (mut pid, clock) = manual(
            PidOptions::default()
                .with_tuning(0.0, 1.0, 1.0)
                .with_interval_ms(100)
                .with_target(10.0),
        );

        assert_relative_eq!(pid.compute().unwrap(), 1.0);
        clock.advance_ms(100);
        pid.set_input(4.0);
        assert_relative_eq!(pid.compute().unwrap(), 1.6 - 40.0, epsilon = 1e-9);

        pid.reset();
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.last_input(), 4.0);

        // Eligible right away, with no derivative contribution
        assert_relative_eq!(pid.compute().unwrap(), 0.6, epsilon = 1e-9);
        assert_eq!(pid.kd(), 1.0, "reset must keep tuning");
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = PidController::with_clock(
            PidOptions::default().with_bounds(10.0, -10.0),
            ManualClock::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PidError::InvalidBounds { lower, upper } if lower == 10.0 && upper == -10.0));

        let (mut pid, _) = manual(demo_options());
        assert!(pid.set_upper_bound(-31.0).is_err());
        assert!(pid.set_lower_bound(31.0).is_err());
        assert!(pid.set_bounds(f64::NAN, 1.0).is_err());
        assert_eq!(pid.lower_bound(), Some(-30.0));
        assert_eq!(pid.upper_bound(), Some(30.0));

        pid.set_upper_bound(50.0).unwrap();
        pid.set_lower_bound(0.0).unwrap();
        assert_eq!((pid.lower_bound(), pid.upper_bound()), (Some(0.0), Some(50.0)));

        pid.clear_bounds();
        assert_eq!((pid.lower_bound(), pid.upper_bound()), (None, None));
    }

    #[test]
    fn non_finite_signals_are_treated_as_missing() {
        let (mut pid, _) = manual(PidOptions::default());
        pid.set_input(f64::NAN);
        pid.set_target(f64::NEG_INFINITY);
        assert_eq!(pid.input(), 0.0);
        assert_eq!(pid.target(), 0.0);
    }

    #[test]
    fn output_channel_receives_outputs() {
        let (mut pid, clock) = manual(demo_options());
        let (id, rx) = pid.output_channel();

        pid.compute();
        clock.advance_ms(300);
        pid.compute();

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![30.0, 30.0]);
        assert!(pid.unsubscribe(id));
    }
}
