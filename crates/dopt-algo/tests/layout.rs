//! Decision-vector layout completeness over a grid of configurations.

use dopt_algo::transcription::indexer::IndexerInput;
use dopt_algo::{CollocationBasis, Scheme, VarType, VariableIndexMap};

fn assert_partition(map: &VariableIndexMap) {
    let mut covered = vec![0u8; map.n_xx()];
    for record in map.records() {
        for i in record.range() {
            covered[i] += 1;
        }
    }
    assert!(covered.iter().all(|&c| c == 1), "records do not partition [0, n_xx)");
    map.verify().unwrap();
}

#[test]
fn test_layout_partitions_decision_vector() {
    let blockings: [Option<&[usize]>; 3] = [None, Some(&[2, 2]), Some(&[1, 3])];
    for scheme in [Scheme::Radau, Scheme::Gauss, Scheme::GaussLobatto] {
        for n_cp in 2..=4 {
            let basis = CollocationBasis::new(scheme, n_cp).unwrap();
            for blocking_factors in blockings {
                for (n_x, n_u, n_w, n_p) in [(1, 0, 0, 0), (2, 1, 1, 1), (3, 2, 0, 2)] {
                    for explicit_continuity in [false, true] {
                        for (free_start, free_final) in [(false, false), (true, true)] {
                            let input = IndexerInput {
                                n_x,
                                n_u,
                                n_w,
                                n_p,
                                n_e: 4,
                                basis: &basis,
                                blocking_factors,
                                explicit_continuity,
                                free_start,
                                free_final,
                                free_phase_boundaries: explicit_continuity,
                            };
                            let map = VariableIndexMap::build(&input).unwrap();
                            assert_partition(&map);
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn test_every_node_resolves_its_state() {
    for scheme in [Scheme::Radau, Scheme::Gauss, Scheme::GaussLobatto] {
        let basis = CollocationBasis::new(scheme, 3).unwrap();
        let input = IndexerInput {
            n_x: 2,
            n_u: 1,
            n_w: 0,
            n_p: 0,
            n_e: 3,
            basis: &basis,
            blocking_factors: None,
            explicit_continuity: false,
            free_start: false,
            free_final: false,
            free_phase_boundaries: false,
        };
        let map = VariableIndexMap::build(&input).unwrap();
        for element in 0..3 {
            for node in 0..=basis.exit_node() {
                let range = map.range(element, node, VarType::X).unwrap();
                assert!(range.end <= map.n_xx());
            }
            if element > 0 {
                assert_eq!(map.element_entry_state(element), map.element_exit_state(element - 1));
            }
        }
    }
}

#[test]
fn test_blocking_factor_mismatch_is_configuration_error() {
    let basis = CollocationBasis::new(Scheme::Radau, 2).unwrap();
    let input = IndexerInput {
        n_x: 1,
        n_u: 1,
        n_w: 0,
        n_p: 0,
        n_e: 4,
        basis: &basis,
        blocking_factors: Some(&[2, 1]),
        explicit_continuity: false,
        free_start: false,
        free_final: false,
        free_phase_boundaries: false,
    };
    assert!(matches!(
        VariableIndexMap::build(&input),
        Err(dopt_core::DoptError::Configuration(_))
    ));
}
