mod healing_scenario_tests;
