use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use ecu_unlock::{
    channel::{CanBusSession, CanChannel, CanFrame, ChannelError, ChannelResult},
    dispatch::Dispatcher,
    sequencer::{EcuKind, SessionState, StepOutcome},
    transform::{bcm_round, gwm_round1, gwm_round2},
};

const GWM_TX: u32 = 0x776;
const GWM_RX: u32 = 0x77E;
const BCM_TX: u32 = 0x740;
const BCM_RX: u32 = 0x748;

fn key_from(data: &[u8]) -> Option<u32> {
    Some(u32::from_be_bytes(data.get(2..6)?.try_into().ok()?))
}

/// Gateway module which only unlocks if both keys are right
#[derive(Debug, Default)]
struct GwmSim {
    seed1: u32,
    seed2: u32,
    keys_ok: u8,
    rejected: bool,
    unlocked: bool,
}

impl GwmSim {
    fn on_request(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        let ft = data.first()? >> 4;
        let sub = *data.get(1)?;
        match (ft, sub) {
            (1, 0x01) => {
                self.keys_ok = 0;
                self.unlocked = false;
                Some(vec![0x10, 0x01])
            }
            (1, 0x03) => Some(vec![0x10, 0x03]),
            (2, 0x41) if data.get(2..6) == Some(&[0x3E, 0xAB, 0x00, 0x0D][..]) => {
                let mut r = vec![0x21, 0x41];
                r.extend_from_slice(&self.seed1.to_be_bytes());
                Some(r)
            }
            (2, 0x42) => {
                if key_from(data)? == gwm_round1(self.seed1) {
                    self.keys_ok += 1;
                    Some(vec![0x21, 0x42])
                } else {
                    self.rejected = true;
                    None
                }
            }
            (2, 0x01) => {
                let mut r = vec![0x21, 0x01];
                r.extend_from_slice(&self.seed2.to_be_bytes());
                Some(r)
            }
            (2, 0x02) => {
                if key_from(data)? == gwm_round2(self.seed2) {
                    self.keys_ok += 1;
                    Some(vec![0x21, 0x02])
                } else {
                    self.rejected = true;
                    None
                }
            }
            (3, 0x01) if data.get(2..5) == Some(&[0xAA, 0xFF, 0x00][..]) => Some(vec![0x30, 0x01]),
            (3, 0x03) if data.get(2..4) == Some(&[0xAA, 0xFF][..]) => {
                self.unlocked = self.keys_ok == 2;
                Some(vec![0x30, 0x03])
            }
            _ => None,
        }
    }
}

/// Body control module, which wants tester present once unlocked
#[derive(Debug, Default)]
struct BcmSim {
    seed: u32,
    authenticated: bool,
    rejected: bool,
    tester_present: usize,
}

impl BcmSim {
    fn on_request(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        let ft = data.first()? >> 4;
        let sub = *data.get(1)?;
        match (ft, sub) {
            (1, 0x03) => Some(vec![0x10, 0x03]),
            (3, _) if data[0] == 0x3E => Some(vec![0x30, 0x00, 0x00]),
            (2, 0x01) => {
                let mut r = vec![0x21, 0x01];
                r.extend_from_slice(&self.seed.to_be_bytes());
                Some(r)
            }
            (2, 0x02) => {
                if key_from(data)? == bcm_round(self.seed) {
                    self.authenticated = true;
                    Some(vec![0x21, 0x02])
                } else {
                    self.rejected = true;
                    None
                }
            }
            (0, 0x3E) => {
                self.tester_present += 1;
                Some(vec![0x02, 0x7E, 0x00])
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    gwm: GwmSim,
    bcm: BcmSim,
    rx_queue: VecDeque<CanFrame>,
    mute: bool,
    noise: bool,
}

/// CAN bus with both simulated ECUs attached
#[derive(Debug, Clone, Default)]
struct SimBus(Arc<Mutex<SimState>>);

impl SimBus {
    fn with_seeds(gwm: (u32, u32), bcm: u32) -> Self {
        let bus = Self::default();
        {
            let mut s = bus.0.lock().unwrap();
            s.gwm.seed1 = gwm.0;
            s.gwm.seed2 = gwm.1;
            s.bcm.seed = bcm;
        }
        bus
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.0.lock().unwrap()
    }

    fn pop_rx(&self) -> Option<CanFrame> {
        self.state().rx_queue.pop_front()
    }
}

impl CanChannel for SimBus {
    fn write_packets(&mut self, packets: Vec<CanFrame>, _timeout_ms: u32) -> ChannelResult<()> {
        let mut s = self.0.lock().map_err(|e| ChannelError::Other(e.to_string()))?;
        for p in packets {
            log::debug!("Tester Out -> 0x{:04X} {:02X?}", p.get_address(), p.get_data());
            let (resp, rx_id) = match p.get_address() {
                GWM_TX => (s.gwm.on_request(p.get_data()), GWM_RX),
                BCM_TX => (s.bcm.on_request(p.get_data()), BCM_RX),
                _ => (None, 0),
            };
            if s.noise {
                s.rx_queue.push_back(CanFrame::new(0x7E8, &[0x10, 0x01, 0x21, 0x02], false));
                s.rx_queue.push_back(CanFrame::new(rx_id, &[0x03, 0x62, 0xF1, 0x90], false));
            }
            if let Some(r) = resp {
                if !s.mute {
                    s.rx_queue.push_back(CanFrame::new(rx_id, &r, false));
                }
            }
        }
        Ok(())
    }
}

/// Feeds everything the ECUs said back into the dispatcher until they go quiet
fn pump(d: &mut Dispatcher, bus: &mut CanBusSession<SimBus>, sim: &SimBus) -> Vec<StepOutcome> {
    let mut outcomes = vec![];
    while let Some(f) = sim.pop_rx() {
        log::debug!("ECU In -> 0x{:04X} {:02X?}", f.get_address(), f.get_data());
        if let Some(o) = d
            .on_can_frame(bus, f.get_address(), f.get_data())
            .expect("Dispatch failed")
        {
            outcomes.push(o);
        }
    }
    outcomes
}

fn setup(sim: &SimBus) -> (Dispatcher, CanBusSession<SimBus>) {
    let _ = env_logger::try_init();
    (Dispatcher::default(), CanBusSession::new(sim.clone(), 100))
}

#[test]
fn gwm_unlocks() {
    let sim = SimBus::with_seeds((0x1234_5678, 0xDEAD_BEEF), 0);
    let (mut d, mut bus) = setup(&sim);
    d.begin(EcuKind::Gwm, &mut bus).unwrap();
    let outcomes = pump(&mut d, &mut bus, &sim);

    assert_eq!(outcomes.len(), 8);
    assert_eq!(outcomes.last(), Some(&StepOutcome::Completed));
    assert!(d.is_unlocked(EcuKind::Gwm));
    assert!(!d.is_unlocked(EcuKind::Bcm));
    let s = sim.state();
    assert!(s.gwm.unlocked);
    assert!(!s.gwm.rejected);
}

#[test]
fn bcm_unlocks_and_gets_tester_present() {
    let sim = SimBus::with_seeds((0, 0), 0xA5A5_A5A5);
    let (mut d, mut bus) = setup(&sim);
    d.begin(EcuKind::Bcm, &mut bus).unwrap();
    let outcomes = pump(&mut d, &mut bus, &sim);

    // Tester present response is a single frame, which the handshake ignores
    assert_eq!(
        &outcomes[3..],
        &[StepOutcome::KeepAliveSent(BCM_TX), StepOutcome::Ignored]
    );
    assert!(d.is_unlocked(EcuKind::Bcm));
    let s = sim.state();
    assert!(s.bcm.authenticated);
    assert!(!s.bcm.rejected);
    assert_eq!(s.bcm.tester_present, 1);
}

#[test]
fn both_ecus_share_the_bus() {
    let sim = SimBus::with_seeds((0xFFFF_FFFF, 0x0000_0001), 0x0BAD_CAFE);
    let (mut d, mut bus) = setup(&sim);
    d.begin(EcuKind::Gwm, &mut bus).unwrap();
    d.begin(EcuKind::Bcm, &mut bus).unwrap();
    pump(&mut d, &mut bus, &sim);

    assert!(d.is_unlocked(EcuKind::Gwm));
    assert!(d.is_unlocked(EcuKind::Bcm));
    let s = sim.state();
    assert!(s.gwm.unlocked);
    assert_eq!(s.bcm.tester_present, 1);
}

#[test]
fn unlocks_for_many_seeds() {
    let mut seed: u32 = 0x0102_0304;
    for _ in 0..64 {
        // Spread seeds over the whole range, including the top byte which drives the iteration counts
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let sim = SimBus::with_seeds((seed, seed.rotate_left(13)), seed.rotate_right(7));
        let (mut d, mut bus) = setup(&sim);
        d.begin(EcuKind::Gwm, &mut bus).unwrap();
        d.begin(EcuKind::Bcm, &mut bus).unwrap();
        pump(&mut d, &mut bus, &sim);
        let s = sim.state();
        assert!(s.gwm.unlocked, "GWM locked for seed {seed:#010X}");
        assert!(s.bcm.authenticated, "BCM locked for seed {seed:#010X}");
    }
}

#[test]
fn unrelated_traffic_does_not_disturb() {
    let sim = SimBus::with_seeds((0x1111_2222, 0x3333_4444), 0x5555_6666);
    sim.state().noise = true;
    let (mut d, mut bus) = setup(&sim);
    d.begin(EcuKind::Gwm, &mut bus).unwrap();
    d.begin(EcuKind::Bcm, &mut bus).unwrap();
    pump(&mut d, &mut bus, &sim);
    assert!(d.is_unlocked(EcuKind::Gwm));
    assert!(d.is_unlocked(EcuKind::Bcm));
    assert!(sim.state().gwm.unlocked);
}

#[test]
fn silent_ecu_parks_until_restart() {
    let sim = SimBus::with_seeds((0x1234_5678, 0x8765_4321), 0);
    sim.state().mute = true;
    let (mut d, mut bus) = setup(&sim);
    d.begin(EcuKind::Gwm, &mut bus).unwrap();
    assert!(pump(&mut d, &mut bus, &sim).is_empty());
    assert_eq!(d.sequencer(EcuKind::Gwm).state(), SessionState::Awaiting(0));

    sim.state().mute = false;
    d.begin(EcuKind::Gwm, &mut bus).unwrap();
    pump(&mut d, &mut bus, &sim);
    assert!(d.is_unlocked(EcuKind::Gwm));
}
